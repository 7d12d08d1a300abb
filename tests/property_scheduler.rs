//! Property-based tests for the scheduler and the task reducer.

use proptest::prelude::*;
use std::collections::HashSet;

use foreman::domain::models::{Task, TaskPriority, TaskStatus, WorkflowRecord};
use foreman::services::reducers::reduce_tasks;
use foreman::services::{ScheduleOutcome, TaskScheduler};

fn priority_strategy() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::Critical),
        Just(TaskPriority::High),
        Just(TaskPriority::Medium),
        Just(TaskPriority::Low),
    ]
}

fn status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
    ]
}

/// Generate a record with up to 12 tasks. Dependencies only point at
/// earlier tasks, so the graph is always a DAG. Completed tasks are
/// mirrored into the completed-id set.
fn record_strategy() -> impl Strategy<Value = WorkflowRecord> {
    prop::collection::vec(
        (
            priority_strategy(),
            status_strategy(),
            prop::collection::vec(0usize..12, 0..3),
            prop::collection::vec(0usize..6, 0..3),
        ),
        0..12,
    )
    .prop_map(|specs| {
        let mut record = WorkflowRecord::new("prop");
        for (i, (priority, status, deps, files)) in specs.iter().enumerate() {
            let mut task = Task::new(format!("task-{i}"), format!("generated {i}"))
                .with_priority(*priority)
                .with_files_to_modify(
                    files
                        .iter()
                        .map(|f| format!("src/file-{f}.rs"))
                        .collect(),
                );
            for dep in deps {
                if *dep < i {
                    task = task.with_dependency(format!("task-{dep}"));
                }
            }
            task.status = *status;
            if *status == TaskStatus::Completed {
                record.completed_ids.push(task.id.clone());
            }
            if *status == TaskStatus::Failed {
                record.failed_ids.push(task.id.clone());
            }
            record.tasks.push(task);
        }
        record
    })
}

proptest! {
    /// Every batched id is pending with all dependencies completed,
    /// and never already in the completed/failed sets.
    #[test]
    fn batched_tasks_are_exactly_available(record in record_strategy(), workers in 1usize..6) {
        if let ScheduleOutcome::Batch(batch) = TaskScheduler::new().schedule(&record, workers) {
            let completed: HashSet<&str> =
                record.completed_ids.iter().map(String::as_str).collect();
            let failed: HashSet<&str> =
                record.failed_ids.iter().map(String::as_str).collect();
            for id in &batch {
                let task = record.task(id).expect("batched id exists");
                prop_assert_eq!(task.status, TaskStatus::Pending);
                prop_assert!(!completed.contains(id.as_str()));
                prop_assert!(!failed.contains(id.as_str()));
                for dep in &task.depends_on {
                    prop_assert!(completed.contains(dep.as_str()));
                }
            }
        }
    }

    /// No two batched tasks ever share a file, and a task without
    /// file metadata only appears in a singleton batch.
    #[test]
    fn batches_are_conflict_free(record in record_strategy(), workers in 1usize..6) {
        if let ScheduleOutcome::Batch(batch) = TaskScheduler::new().schedule(&record, workers) {
            prop_assert!(batch.len() <= workers.max(1));
            let mut claimed: HashSet<String> = HashSet::new();
            for id in &batch {
                let task = record.task(id).expect("batched id exists");
                if !task.has_file_metadata() {
                    prop_assert_eq!(batch.len(), 1);
                    continue;
                }
                for file in task.file_footprint() {
                    prop_assert!(
                        claimed.insert(file.to_string()),
                        "file {} claimed twice", file
                    );
                }
            }
        }
    }

    /// Scheduling the same record twice yields the same outcome.
    #[test]
    fn scheduling_is_deterministic(record in record_strategy(), workers in 1usize..6) {
        let first = TaskScheduler::new().schedule(&record, workers);
        let second = TaskScheduler::new().schedule(&record, workers);
        prop_assert_eq!(first, second);
    }

    /// A deadlock is reported only when pending tasks exist, and the
    /// reported set is exactly the pending tasks.
    #[test]
    fn deadlock_reports_pending_tasks(record in record_strategy()) {
        if let ScheduleOutcome::Deadlock { pending } = TaskScheduler::new().schedule(&record, 4) {
            prop_assert!(!pending.is_empty());
            let expected: Vec<String> = record
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .map(|t| t.id.clone())
                .collect();
            prop_assert_eq!(pending, expected);
        }
    }

    /// Task-list merge is idempotent for arbitrary task lists.
    #[test]
    fn task_merge_idempotent(record in record_strategy()) {
        let mut tasks = record.tasks.clone();
        reduce_tasks(&mut tasks, record.tasks.clone(), 1);
        prop_assert_eq!(tasks, record.tasks);
    }
}
