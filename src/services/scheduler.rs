//! Task scheduler - dependency-aware, conflict-aware, priority-ordered
//! selection of the next batch of work.
//!
//! The scheduler is pure: it reads the record and returns an outcome;
//! marking tasks in progress happens through a `RecordDelta` so the
//! shared record is still mutated only by the reducer layer.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::domain::models::{Task, TaskStatus, WorkflowRecord};
use crate::services::reducers::RecordDelta;

/// Outcome of one scheduling call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Every task id is in the completed set (or no tasks exist).
    AllDone,
    /// Pending tasks remain but none are available: their dependencies
    /// can never be satisfied. Always escalated, never retried.
    Deadlock { pending: Vec<String> },
    /// Ids selected for execution, conflict-free, in priority order.
    Batch(Vec<String>),
}

/// Index over the task list built once per scheduling call.
struct TaskIndex<'a> {
    /// Status buckets over the whole task list
    by_status: HashMap<TaskStatus, Vec<&'a Task>>,
    /// Cached "available" set: pending, not completed/failed, all
    /// dependencies completed. Computed once, O(pending).
    available: Vec<&'a Task>,
}

impl<'a> TaskIndex<'a> {
    fn build(record: &'a WorkflowRecord) -> Self {
        let mut by_status: HashMap<TaskStatus, Vec<&Task>> = HashMap::new();
        for task in &record.tasks {
            by_status.entry(task.status).or_default().push(task);
        }

        let completed: BTreeSet<&str> =
            record.completed_ids.iter().map(String::as_str).collect();
        let failed: BTreeSet<&str> = record.failed_ids.iter().map(String::as_str).collect();

        let available = by_status
            .get(&TaskStatus::Pending)
            .map(|pending| {
                pending
                    .iter()
                    .copied()
                    .filter(|t| {
                        !completed.contains(t.id.as_str())
                            && !failed.contains(t.id.as_str())
                            && t.depends_on.iter().all(|d| completed.contains(d.as_str()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            by_status,
            available,
        }
    }

    fn pending(&self) -> &[&'a Task] {
        self.by_status
            .get(&TaskStatus::Pending)
            .map_or(&[], Vec::as_slice)
    }
}

/// The task scheduler.
#[derive(Debug, Clone, Default)]
pub struct TaskScheduler;

impl TaskScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Select the next batch of work.
    ///
    /// Returns `AllDone` when nothing is left, `Deadlock` when pending
    /// tasks exist but none can ever run, and otherwise a batch of up
    /// to `workers` ids whose file footprints do not intersect.
    pub fn schedule(&self, record: &WorkflowRecord, workers: usize) -> ScheduleOutcome {
        let index = TaskIndex::build(record);

        if record.tasks.is_empty() || record.all_tasks_completed() {
            return ScheduleOutcome::AllDone;
        }

        if index.available.is_empty() {
            if index.pending().is_empty() {
                // Nothing pending and not everything completed: the
                // remaining tasks are failed or in flight; let the
                // caller decide based on the record.
                return ScheduleOutcome::Batch(Vec::new());
            }
            let pending: Vec<String> = index.pending().iter().map(|t| t.id.clone()).collect();
            warn!(
                pending = pending.len(),
                "Dependency deadlock: pending tasks with unsatisfiable dependencies"
            );
            return ScheduleOutcome::Deadlock { pending };
        }

        let sorted = self.sort_available(&index, record);
        let batch_size = workers.min(sorted.len()).max(1);
        let batch = select_conflict_free(&sorted, batch_size);

        debug!(
            available = sorted.len(),
            selected = batch.len(),
            "Scheduled task batch"
        );
        ScheduleOutcome::Batch(batch.into_iter().map(|t| t.id.clone()).collect())
    }

    /// Deterministic ordering: ascending (priority rank, milestone
    /// position in the record's milestone order, numeric id suffix).
    /// Unknown milestones and missing suffixes sort last; the id
    /// itself is the final tie-break so the order is total.
    fn sort_available<'a>(
        &self,
        index: &TaskIndex<'a>,
        record: &WorkflowRecord,
    ) -> Vec<&'a Task> {
        let milestone_pos: HashMap<&str, usize> = record
            .milestones
            .iter()
            .enumerate()
            .map(|(i, m)| (m.as_str(), i))
            .collect();

        let mut sorted = index.available.clone();
        sorted.sort_by_key(|t| {
            (
                t.priority.rank(),
                t.milestone
                    .as_deref()
                    .and_then(|m| milestone_pos.get(m).copied())
                    .unwrap_or(usize::MAX),
                t.numeric_suffix().unwrap_or(u64::MAX),
                t.id.clone(),
            )
        });
        sorted
    }

    /// Build the delta that marks a scheduled batch in progress and
    /// replaces the in-flight set.
    pub fn delta_for_batch(&self, record: &WorkflowRecord, batch: &[String]) -> RecordDelta {
        let tasks = batch
            .iter()
            .filter_map(|id| record.task(id))
            .map(|t| {
                let mut task = t.clone();
                task.status = TaskStatus::InProgress;
                task.updated_at = chrono::Utc::now();
                task
            })
            .collect();
        RecordDelta {
            tasks,
            in_flight_ids: Some(batch.to_vec()),
            ..Default::default()
        }
    }
}

/// Greedily pick up to `batch_size` tasks with pairwise-disjoint file
/// footprints. A task without file metadata is only ever selected
/// alone, since its footprint is unknown. If the filter excludes
/// everything, fall back to the single highest-priority task.
fn select_conflict_free<'a>(sorted: &[&'a Task], batch_size: usize) -> Vec<&'a Task> {
    let mut selected: Vec<&Task> = Vec::new();
    let mut claimed: BTreeSet<&str> = BTreeSet::new();

    for task in sorted {
        if selected.len() >= batch_size {
            break;
        }
        if !task.has_file_metadata() {
            if selected.is_empty() {
                // Unknown footprint: run alone.
                return vec![task];
            }
            continue;
        }
        let footprint = task.file_footprint();
        if footprint.iter().any(|f| claimed.contains(f)) {
            continue;
        }
        claimed.extend(footprint);
        selected.push(task);
    }

    if selected.is_empty() {
        // Conflict filter excluded everything; run the top task alone.
        sorted.first().map(|t| vec![*t]).unwrap_or_default()
    } else {
        selected
    }
}
