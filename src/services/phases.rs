//! Phase state machine.
//!
//! Governs which of the five lifecycle phases is active, attempt
//! counting, and transition legality. All mutations are expressed as
//! deltas merged through the reducer layer.

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{PhaseState, PhaseStatus, RouteDecision, WorkflowRecord};
use crate::services::reducers::RecordDelta;

/// Stateless service enforcing phase transition rules.
#[derive(Debug, Clone, Copy)]
pub struct PhaseMachine {
    max_attempts: u32,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl PhaseMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// A phase may only enter in_progress when the previous phase is
    /// completed and the phase itself has no unresolved blockers.
    pub fn can_begin(&self, record: &WorkflowRecord, phase: u8) -> EngineResult<()> {
        let state = record.phase(phase)?;
        if state.is_blocked() {
            return Err(EngineError::InvalidStateTransition {
                from: state.status.as_str().to_string(),
                to: PhaseStatus::InProgress.as_str().to_string(),
                reason: format!("phase {phase} has unresolved blockers"),
            });
        }
        if phase > 1 {
            let previous = record.phase(phase - 1)?;
            if previous.status != PhaseStatus::Completed {
                return Err(EngineError::InvalidStateTransition {
                    from: previous.status.as_str().to_string(),
                    to: PhaseStatus::InProgress.as_str().to_string(),
                    reason: format!("phase {} is not completed", phase - 1),
                });
            }
        }
        Ok(())
    }

    /// Begin a phase, incrementing its attempt counter. Refuses once
    /// the attempt budget is spent; attempts never exceed max_attempts.
    pub fn begin(&self, record: &WorkflowRecord, phase: u8) -> EngineResult<RecordDelta> {
        self.can_begin(record, phase)?;
        let current = record.phase(phase)?;
        let max_attempts = self.max_attempts.max(current.max_attempts);
        if current.attempts >= max_attempts {
            return Err(EngineError::InvalidStateTransition {
                from: current.status.as_str().to_string(),
                to: PhaseStatus::InProgress.as_str().to_string(),
                reason: format!("phase {phase} attempt budget exhausted"),
            });
        }
        let mut state = PhaseState::with_max_attempts(max_attempts);
        state.status = PhaseStatus::InProgress;
        state.attempts = current.attempts + 1;
        state.started_at = Some(Utc::now());

        info!(phase, attempt = state.attempts, "Phase started");
        let mut delta = RecordDelta::default();
        delta.phases.insert(phase, state);
        delta.current_phase = Some(phase);
        Ok(delta)
    }

    /// Complete a phase. Advances `current_phase` for phases 1-4 and
    /// resets the routing decision to continue.
    pub fn complete(
        &self,
        record: &WorkflowRecord,
        phase: u8,
        output: Option<serde_json::Value>,
    ) -> EngineResult<RecordDelta> {
        let current = record.phase(phase)?;
        if current.status != PhaseStatus::InProgress {
            return Err(EngineError::InvalidStateTransition {
                from: current.status.as_str().to_string(),
                to: PhaseStatus::Completed.as_str().to_string(),
                reason: format!("phase {phase} is not in progress"),
            });
        }

        let mut state = current.clone();
        state.status = PhaseStatus::Completed;
        state.completed_at = Some(Utc::now());
        state.output = output;

        info!(phase, "Phase completed");
        let mut delta = RecordDelta::default();
        delta.phases.insert(phase, state);
        if phase < 5 {
            delta.current_phase = Some(phase + 1);
        }
        delta.next_decision = Some(RouteDecision::Continue);
        Ok(delta)
    }

    /// Record a phase failure. While attempts remain below the budget
    /// the phase stays retriable and the decision is retry; once the
    /// budget is exhausted the phase fails for good and the decision
    /// becomes escalate.
    pub fn fail(
        &self,
        record: &WorkflowRecord,
        phase: u8,
        reason: &str,
    ) -> EngineResult<RecordDelta> {
        let current = record.phase(phase)?;
        let mut state = current.clone();
        let mut delta = RecordDelta::default();

        if current.attempts < state.max_attempts {
            warn!(
                phase,
                attempts = current.attempts,
                max_attempts = state.max_attempts,
                reason,
                "Phase attempt failed, will retry"
            );
            // Back to pending so begin() can re-enter it.
            state.status = PhaseStatus::Pending;
            delta.next_decision = Some(RouteDecision::Retry);
        } else {
            warn!(phase, reason, "Phase failed, attempt budget exhausted");
            state.status = PhaseStatus::Failed;
            state.completed_at = Some(Utc::now());
            delta.next_decision = Some(RouteDecision::Escalate);
        }

        delta.phases.insert(phase, state);
        Ok(delta)
    }

    /// Force a phase into blocked pending external clarification.
    /// Blocked phases are not eligible for silent retry.
    pub fn block(
        &self,
        record: &WorkflowRecord,
        phase: u8,
        blockers: Vec<String>,
    ) -> EngineResult<RecordDelta> {
        let current = record.phase(phase)?;
        let mut state = current.clone();
        state.status = PhaseStatus::Blocked;
        for blocker in blockers {
            if !state.blockers.contains(&blocker) {
                state.blockers.push(blocker);
            }
        }

        warn!(phase, blockers = state.blockers.len(), "Phase blocked");
        let mut delta = RecordDelta::default();
        delta.phases.insert(phase, state);
        delta.next_decision = Some(RouteDecision::Escalate);
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reducers::apply;

    fn machine() -> PhaseMachine {
        PhaseMachine::new(3)
    }

    fn complete_phase(record: &mut WorkflowRecord, phase: u8) {
        let delta = machine().begin(record, phase).unwrap();
        apply(record, delta, 1);
        let delta = machine().complete(record, phase, None).unwrap();
        apply(record, delta, 1);
    }

    #[test]
    fn test_phase_one_can_begin_fresh() {
        let record = WorkflowRecord::new("demo");
        assert!(machine().can_begin(&record, 1).is_ok());
    }

    #[test]
    fn test_cannot_begin_with_previous_incomplete() {
        let record = WorkflowRecord::new("demo");
        assert!(machine().can_begin(&record, 2).is_err());
    }

    #[test]
    fn test_complete_advances_current_phase() {
        let mut record = WorkflowRecord::new("demo");
        complete_phase(&mut record, 1);
        assert_eq!(record.current_phase, 2);
        assert_eq!(record.phase(1).unwrap().status, PhaseStatus::Completed);
        assert_eq!(record.next_decision, RouteDecision::Continue);
        assert!(machine().can_begin(&record, 2).is_ok());
    }

    #[test]
    fn test_completing_phase_five_does_not_advance() {
        let mut record = WorkflowRecord::new("demo");
        for phase in 1..=5 {
            complete_phase(&mut record, phase);
        }
        assert_eq!(record.current_phase, 5);
    }

    #[test]
    fn test_fail_retries_until_budget_exhausted() {
        let mut record = WorkflowRecord::new("demo");

        for attempt in 1..=3 {
            let delta = machine().begin(&record, 1).unwrap();
            apply(&mut record, delta, 1);
            assert_eq!(record.phase(1).unwrap().attempts, attempt);

            let delta = machine().fail(&record, 1, "planner returned garbage").unwrap();
            apply(&mut record, delta, 1);

            if attempt < 3 {
                assert_eq!(record.next_decision, RouteDecision::Retry);
            }
        }

        // Third failure exhausts the budget
        assert_eq!(record.phase(1).unwrap().status, PhaseStatus::Failed);
        assert_eq!(record.next_decision, RouteDecision::Escalate);
        // Attempts never exceed max_attempts
        assert!(record.phase(1).unwrap().attempts <= record.phase(1).unwrap().max_attempts);
    }

    #[test]
    fn test_begin_refuses_once_budget_spent() {
        let mut record = WorkflowRecord::new("demo");
        for _ in 0..3 {
            let delta = machine().begin(&record, 1).unwrap();
            apply(&mut record, delta, 1);
            let delta = machine().fail(&record, 1, "flaky planner").unwrap();
            apply(&mut record, delta, 1);
        }
        assert!(machine().begin(&record, 1).is_err());
    }

    #[test]
    fn test_blocked_phase_cannot_begin() {
        let mut record = WorkflowRecord::new("demo");
        let delta = machine()
            .block(&record, 1, vec!["needs repository access".to_string()])
            .unwrap();
        apply(&mut record, delta, 1);

        assert_eq!(record.next_decision, RouteDecision::Escalate);
        assert!(machine().can_begin(&record, 1).is_err());
    }

    #[test]
    fn test_complete_requires_in_progress() {
        let record = WorkflowRecord::new("demo");
        assert!(machine().complete(&record, 1, None).is_err());
    }
}
