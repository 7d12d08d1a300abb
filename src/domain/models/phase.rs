//! Phase lifecycle model.
//!
//! A workflow run passes through five sequential phases. Each phase
//! tracks its own attempt budget and unresolved blockers; transition
//! legality is enforced by the phase machine in `services::phases`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five sequential lifecycle phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Planning,
    Validation,
    Implementation,
    Verification,
    Completion,
}

impl WorkflowPhase {
    /// Phase number, 1-5.
    pub fn number(&self) -> u8 {
        match self {
            Self::Planning => 1,
            Self::Validation => 2,
            Self::Implementation => 3,
            Self::Verification => 4,
            Self::Completion => 5,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Planning),
            2 => Some(Self::Validation),
            3 => Some(Self::Implementation),
            4 => Some(Self::Verification),
            5 => Some(Self::Completion),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Validation => "validation",
            Self::Implementation => "implementation",
            Self::Verification => "verification",
            Self::Completion => "completion",
        }
    }

    /// All phases in order.
    pub fn all() -> [Self; 5] {
        [
            Self::Planning,
            Self::Validation,
            Self::Implementation,
            Self::Verification,
            Self::Completion,
        ]
    }
}

/// Status of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    Blocked,
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Blocked => "blocked",
        }
    }

    /// Check if this is a terminal state for the phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Ordering used by the phase reducer when two branches report
    /// different statuses for the same phase: keep the further-advanced.
    pub fn progress_rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Blocked => 2,
            Self::Skipped => 3,
            Self::Failed => 4,
            Self::Completed => 5,
        }
    }
}

/// Per-phase state held in the workflow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    /// Current status
    #[serde(default)]
    pub status: PhaseStatus,
    /// Attempts made at this phase
    #[serde(default)]
    pub attempts: u32,
    /// Attempt budget before the phase fails for good
    #[serde(default = "default_phase_max_attempts")]
    pub max_attempts: u32,
    /// When the phase first entered in_progress
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the phase reached a terminal status
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Unresolved blockers requiring external clarification
    #[serde(default)]
    pub blockers: Vec<String>,
    /// Free-form phase output payload
    #[serde(default)]
    pub output: Option<serde_json::Value>,
}

const fn default_phase_max_attempts() -> u32 {
    3
}

impl Default for PhaseState {
    fn default() -> Self {
        Self {
            status: PhaseStatus::Pending,
            attempts: 0,
            max_attempts: default_phase_max_attempts(),
            started_at: None,
            completed_at: None,
            blockers: Vec::new(),
            output: None,
        }
    }
}

impl PhaseState {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Whether the phase has attempt budget left.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether the phase has unresolved blockers.
    pub fn is_blocked(&self) -> bool {
        self.status == PhaseStatus::Blocked || !self.blockers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_numbers_round_trip() {
        for phase in WorkflowPhase::all() {
            assert_eq!(WorkflowPhase::from_number(phase.number()), Some(phase));
        }
        assert_eq!(WorkflowPhase::from_number(0), None);
        assert_eq!(WorkflowPhase::from_number(6), None);
    }

    #[test]
    fn test_phase_state_defaults() {
        let state = PhaseState::default();
        assert_eq!(state.status, PhaseStatus::Pending);
        assert_eq!(state.max_attempts, 3);
        assert!(state.can_retry());
        assert!(!state.is_blocked());
    }

    #[test]
    fn test_progress_rank_orders_statuses() {
        assert!(PhaseStatus::Completed.progress_rank() > PhaseStatus::InProgress.progress_rank());
        assert!(PhaseStatus::InProgress.progress_rank() > PhaseStatus::Pending.progress_rank());
    }

    #[test]
    fn test_blocked_via_blockers() {
        let mut state = PhaseState::default();
        state.blockers.push("needs credentials".to_string());
        assert!(state.is_blocked());
    }
}
