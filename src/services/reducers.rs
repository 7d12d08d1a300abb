//! Record reducers - the concurrent state-merge layer.
//!
//! Steps never mutate the workflow record directly; they return a
//! `RecordDelta` and the driver merges it through the pure functions
//! here. The reducers are the only place concurrent writes are
//! reconciled, so they must be deterministic and order-tolerant:
//! idempotent for identical inputs and commutative across independent
//! task ids.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::domain::models::{
    ErrorContext, PhaseState, RouteDecision, Task, TaskStatus, WorkflowRecord, ERROR_LOG_CAP,
    ID_HISTORY_CAP,
};

/// A partial update produced by one graph step. Every field is
/// optional; absent fields leave the record untouched.
#[derive(Debug, Clone, Default)]
pub struct RecordDelta {
    pub current_phase: Option<u8>,
    /// Per-phase updates. Parallel branches merge field-wise via
    /// [`reduce_phase`]; the applied delta replaces the stored state.
    pub phases: BTreeMap<u8, PhaseState>,
    /// Task updates, merged by id
    pub tasks: Vec<Task>,
    /// Milestone order (replace; only set during task breakdown)
    pub milestones: Option<Vec<String>>,
    /// Ids to union into the completed history
    pub completed_ids: Vec<String>,
    /// Ids to union into the failed history
    pub failed_ids: Vec<String>,
    /// Replacement for the in-flight set
    pub in_flight_ids: Option<Vec<String>>,
    /// Errors to append to the capped log
    pub errors: Vec<ErrorContext>,
    pub next_decision: Option<RouteDecision>,
    pub plan: Option<serde_json::Value>,
    pub validation_feedback: Option<serde_json::Value>,
    pub implementation_result: Option<serde_json::Value>,
    pub verification_feedback: Option<serde_json::Value>,
    /// Reviewer feedback entries, shallow-merged
    pub reviewer_feedback: HashMap<String, String>,
    /// When set, a checkpoint with this label is taken after the merge
    pub checkpoint_label: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordDelta {
    /// Delta that only sets the routing decision.
    pub fn decision(decision: RouteDecision) -> Self {
        Self {
            next_decision: Some(decision),
            ..Default::default()
        }
    }

    /// Delta that only appends an error.
    pub fn error(context: ErrorContext) -> Self {
        Self {
            errors: vec![context],
            ..Default::default()
        }
    }

    /// Fold another delta into this one, in order. Used by the
    /// driver's fan-out helper to combine parallel branch outputs
    /// before anything touches the record.
    pub fn merge(mut self, other: Self) -> Self {
        if other.current_phase.is_some() {
            self.current_phase = other.current_phase;
        }
        for (number, incoming) in other.phases {
            match self.phases.remove(&number) {
                Some(mut existing) => {
                    reduce_phase(&mut existing, incoming);
                    self.phases.insert(number, existing);
                }
                None => {
                    self.phases.insert(number, incoming);
                }
            }
        }
        self.tasks.extend(other.tasks);
        if other.milestones.is_some() {
            self.milestones = other.milestones;
        }
        self.completed_ids.extend(other.completed_ids);
        self.failed_ids.extend(other.failed_ids);
        if other.in_flight_ids.is_some() {
            self.in_flight_ids = other.in_flight_ids;
        }
        self.errors.extend(other.errors);
        if other.next_decision.is_some() {
            self.next_decision = other.next_decision;
        }
        if other.plan.is_some() {
            self.plan = other.plan;
        }
        if other.validation_feedback.is_some() {
            self.validation_feedback = other.validation_feedback;
        }
        if other.implementation_result.is_some() {
            self.implementation_result = other.implementation_result;
        }
        if other.verification_feedback.is_some() {
            self.verification_feedback = other.verification_feedback;
        }
        self.reviewer_feedback.extend(other.reviewer_feedback);
        if other.checkpoint_label.is_some() {
            self.checkpoint_label = other.checkpoint_label;
        }
        if other.updated_at.is_some() {
            self.updated_at = reduce_timestamp(self.updated_at, other.updated_at);
        }
        self
    }
}

/// Clone the record with the delta applied. Steps use this to stage
/// intermediate state (e.g. a freshly begun phase) before computing a
/// follow-up transition within the same step; the driver still merges
/// only the step's final delta.
pub fn preview(
    record: &WorkflowRecord,
    delta: &RecordDelta,
    conflict_threshold: u32,
) -> WorkflowRecord {
    let mut staged = record.clone();
    apply(&mut staged, delta.clone(), conflict_threshold);
    staged
}

/// Concatenate then keep the most recent entries; oldest evicted first.
pub fn reduce_error_log(current: &mut Vec<ErrorContext>, incoming: Vec<ErrorContext>) {
    current.extend(incoming);
    if current.len() > ERROR_LOG_CAP {
        let excess = current.len() - ERROR_LOG_CAP;
        current.drain(0..excess);
    }
}

/// Keep the chronologically greater timestamp. ISO-8601 strings sort
/// chronologically, so the serialized form preserves this ordering.
pub fn reduce_timestamp(
    current: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Union preserving first-seen order, capped with oldest eviction.
/// Used for the completed/failed history sets.
pub fn reduce_id_union(current: &mut Vec<String>, incoming: &[String], cap: usize) {
    for id in incoming {
        if !current.contains(id) {
            current.push(id.clone());
        }
    }
    if current.len() > cap {
        let excess = current.len() - cap;
        current.drain(0..excess);
    }
}

/// Replace semantics for "current" sets: the new value wins,
/// deduplicated with order preserved.
pub fn reduce_id_replace(incoming: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    incoming
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Shallow-merge feedback maps; later entries overwrite same keys.
pub fn reduce_feedback(current: &mut HashMap<String, String>, incoming: HashMap<String, String>) {
    current.extend(incoming);
}

/// Field-wise merge for a phase state reported by two parallel
/// branches: keep the further-advanced status, the larger attempt
/// count, the union of blockers. Sequential step updates do not go
/// through this; the driver applies them last-write-wins so the phase
/// machine can legally regress a failed phase back to pending.
pub fn reduce_phase(current: &mut PhaseState, incoming: PhaseState) {
    if incoming.status.progress_rank() > current.status.progress_rank() {
        current.status = incoming.status;
    }
    current.attempts = current.attempts.max(incoming.attempts);
    current.max_attempts = current.max_attempts.max(incoming.max_attempts);
    current.started_at = match (current.started_at, incoming.started_at) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    current.completed_at = reduce_timestamp(current.completed_at, incoming.completed_at);
    for blocker in incoming.blockers {
        if !current.blockers.contains(&blocker) {
            current.blockers.push(blocker);
        }
    }
    if incoming.output.is_some() {
        current.output = incoming.output;
    }
}

/// Merge an incoming task list into the current one, by id.
///
/// New ids are appended. For an existing id the update normally
/// overwrites the stored task; when the two versions conflict
/// (statuses differ and neither is pending, or attempt counts differ
/// by more than `conflict_threshold`) a field-wise merge is applied
/// instead and the conflict is logged, never raised.
pub fn reduce_tasks(current: &mut Vec<Task>, incoming: Vec<Task>, conflict_threshold: u32) {
    for task in incoming {
        match current.iter_mut().find(|t| t.id == task.id) {
            None => current.push(task),
            Some(existing) => {
                if is_conflict(existing, &task, conflict_threshold) {
                    warn!(
                        task_id = %task.id,
                        existing_status = existing.status.as_str(),
                        incoming_status = task.status.as_str(),
                        existing_attempts = existing.attempts,
                        incoming_attempts = task.attempts,
                        "Concurrent task update conflict, applying field-wise merge"
                    );
                    merge_task_fields(existing, task);
                } else {
                    *existing = task;
                }
            }
        }
    }
}

/// Conflict heuristic: statuses differ and neither is the initial
/// pending state, or attempt counts diverge past the threshold.
fn is_conflict(existing: &Task, incoming: &Task, conflict_threshold: u32) -> bool {
    let status_conflict = existing.status != incoming.status
        && existing.status != TaskStatus::Pending
        && incoming.status != TaskStatus::Pending;
    let attempts_conflict = existing.attempts.abs_diff(incoming.attempts) > conflict_threshold;
    status_conflict || attempts_conflict
}

/// Field-wise merge for conflicting task versions: list fields are
/// unioned, the attempt counter takes the maximum, and the
/// further-advanced status wins (terminal states stick).
fn merge_task_fields(existing: &mut Task, incoming: Task) {
    if incoming.status.progress_rank() > existing.status.progress_rank() {
        existing.status = incoming.status;
    }
    existing.attempts = existing.attempts.max(incoming.attempts);
    for note in incoming.notes {
        if !existing.notes.contains(&note) {
            existing.notes.push(note);
        }
    }
    for file in incoming.files_to_create {
        if !existing.files_to_create.contains(&file) {
            existing.files_to_create.push(file);
        }
    }
    for file in incoming.files_to_modify {
        if !existing.files_to_modify.contains(&file) {
            existing.files_to_modify.push(file);
        }
    }
    for dep in incoming.depends_on {
        if !existing.depends_on.contains(&dep) {
            existing.depends_on.push(dep);
        }
    }
    if incoming.last_error.is_some() {
        existing.last_error = incoming.last_error;
    }
    existing.updated_at = existing.updated_at.max(incoming.updated_at);
}

/// Apply a delta to the record through the reducers. This is the
/// single mutation point for the shared record.
pub fn apply(record: &mut WorkflowRecord, delta: RecordDelta, conflict_threshold: u32) {
    if let Some(phase) = delta.current_phase {
        record.current_phase = phase;
    }
    for (number, incoming) in delta.phases {
        record.phases.insert(number, incoming);
    }
    reduce_tasks(&mut record.tasks, delta.tasks, conflict_threshold);
    if let Some(milestones) = delta.milestones {
        record.milestones = milestones;
    }
    reduce_id_union(&mut record.completed_ids, &delta.completed_ids, ID_HISTORY_CAP);
    reduce_id_union(&mut record.failed_ids, &delta.failed_ids, ID_HISTORY_CAP);
    if let Some(in_flight) = delta.in_flight_ids {
        record.in_flight_ids = reduce_id_replace(in_flight);
    }
    reduce_error_log(&mut record.error_log, delta.errors);
    if let Some(decision) = delta.next_decision {
        record.next_decision = decision;
    }
    if delta.plan.is_some() {
        record.plan = delta.plan;
    }
    if delta.validation_feedback.is_some() {
        record.validation_feedback = delta.validation_feedback;
    }
    if delta.implementation_result.is_some() {
        record.implementation_result = delta.implementation_result;
    }
    if delta.verification_feedback.is_some() {
        record.verification_feedback = delta.verification_feedback;
    }
    reduce_feedback(&mut record.reviewer_feedback, delta.reviewer_feedback);
    record.updated_at =
        reduce_timestamp(Some(record.updated_at), delta.updated_at.or_else(|| Some(Utc::now())))
            .unwrap_or(record.updated_at);
    if let Some(label) = delta.checkpoint_label {
        record.checkpoint(label);
    }
}
