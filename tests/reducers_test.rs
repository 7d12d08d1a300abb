//! Reducer contract tests: idempotence, commutativity across
//! independent ids, caps, and conflict handling.

use foreman::domain::models::{
    ErrorContext, ErrorKind, Task, TaskStatus, WorkflowRecord, ERROR_LOG_CAP,
};
use foreman::services::reducers::{apply, reduce_tasks, RecordDelta};
use foreman::RouteDecision;

fn update(id: &str, status: TaskStatus, attempts: u32) -> Task {
    let mut task = Task::new(id, id);
    task.status = status;
    task.attempts = attempts;
    task
}

#[test]
fn merging_a_task_list_with_itself_is_identity() {
    let mut tasks = vec![
        update("task-1", TaskStatus::InProgress, 1),
        update("task-2", TaskStatus::Completed, 2),
    ];
    let snapshot = tasks.clone();
    reduce_tasks(&mut tasks, snapshot.clone(), 1);
    assert_eq!(tasks, snapshot);
}

#[test]
fn independent_task_updates_commute() {
    let base = || {
        vec![
            update("task-1", TaskStatus::Pending, 0),
            update("task-2", TaskStatus::Pending, 0),
            update("task-3", TaskStatus::Pending, 0),
        ]
    };
    let a = update("task-1", TaskStatus::Completed, 1);
    let b = update("task-3", TaskStatus::Failed, 2);

    let mut forward = base();
    reduce_tasks(&mut forward, vec![a.clone()], 1);
    reduce_tasks(&mut forward, vec![b.clone()], 1);

    let mut reverse = base();
    reduce_tasks(&mut reverse, vec![b], 1);
    reduce_tasks(&mut reverse, vec![a], 1);

    assert_eq!(forward, reverse);
}

#[test]
fn conflict_threshold_is_configurable() {
    // Attempts differ by 2: conflict at threshold 1, overwrite at 3
    let mut strict = vec![update("task-1", TaskStatus::InProgress, 1)];
    let mut incoming = update("task-1", TaskStatus::InProgress, 3);
    incoming.notes.push("from branch".to_string());
    reduce_tasks(&mut strict, vec![incoming.clone()], 1);
    // Field-wise merge keeps max attempts
    assert_eq!(strict[0].attempts, 3);

    let mut lenient = vec![update("task-1", TaskStatus::InProgress, 1)];
    reduce_tasks(&mut lenient, vec![incoming], 3);
    // No conflict: plain overwrite
    assert_eq!(lenient[0].attempts, 3);
    assert_eq!(lenient[0].notes, vec!["from branch"]);
}

#[test]
fn conflicting_branches_never_lose_notes() {
    let mut left = update("task-1", TaskStatus::InProgress, 1);
    left.notes.push("left branch observation".to_string());
    let mut right = update("task-1", TaskStatus::Failed, 2);
    right.notes.push("right branch observation".to_string());

    let mut tasks = vec![left];
    reduce_tasks(&mut tasks, vec![right], 0);
    assert_eq!(
        tasks[0].notes,
        vec!["left branch observation", "right branch observation"]
    );
    assert_eq!(tasks[0].status, TaskStatus::Failed);
}

#[test]
fn error_log_cap_holds_under_repeated_merges() {
    let mut record = WorkflowRecord::new("caps");
    for batch in 0..30 {
        let delta = RecordDelta {
            errors: (0..5)
                .map(|i| {
                    ErrorContext::new("step", ErrorKind::Timeout, format!("error {batch}-{i}"))
                })
                .collect(),
            ..Default::default()
        };
        apply(&mut record, delta, 1);
    }
    assert_eq!(record.error_log.len(), ERROR_LOG_CAP);
    // Newest entry survived, oldest were evicted
    assert_eq!(record.error_log.last().unwrap().message, "error 29-4");
    assert_eq!(record.error_log.first().unwrap().message, "error 10-0");
}

#[test]
fn in_flight_ids_use_replace_semantics() {
    let mut record = WorkflowRecord::new("replace");
    apply(
        &mut record,
        RecordDelta {
            in_flight_ids: Some(vec!["task-1".to_string(), "task-2".to_string()]),
            ..Default::default()
        },
        1,
    );
    assert_eq!(record.in_flight_ids, vec!["task-1", "task-2"]);

    apply(
        &mut record,
        RecordDelta {
            in_flight_ids: Some(vec!["task-3".to_string(), "task-3".to_string()]),
            ..Default::default()
        },
        1,
    );
    // Replaced wholesale, deduplicated
    assert_eq!(record.in_flight_ids, vec!["task-3"]);
}

#[test]
fn completed_ids_union_is_idempotent() {
    let mut record = WorkflowRecord::new("union");
    for _ in 0..3 {
        apply(
            &mut record,
            RecordDelta {
                completed_ids: vec!["task-1".to_string(), "task-2".to_string()],
                ..Default::default()
            },
            1,
        );
    }
    assert_eq!(record.completed_ids, vec!["task-1", "task-2"]);
}

#[test]
fn out_of_order_branch_deltas_converge() {
    // Two parallel branches each report their own task and feedback;
    // applying their combined delta in either order converges.
    let branch = |task_id: &str, reviewer: &str| {
        let mut delta = RecordDelta::default();
        delta.tasks.push(update(task_id, TaskStatus::Completed, 1));
        delta.completed_ids.push(task_id.to_string());
        delta
            .reviewer_feedback
            .insert(reviewer.to_string(), format!("{task_id} ok"));
        delta
    };

    let mut forward = WorkflowRecord::new("merge");
    forward.tasks.push(update("task-1", TaskStatus::Pending, 0));
    forward.tasks.push(update("task-2", TaskStatus::Pending, 0));
    let mut reverse = forward.clone();

    let a = branch("task-1", "alpha");
    let b = branch("task-2", "beta");

    apply(&mut forward, a.clone().merge(b.clone()), 1);
    apply(&mut reverse, b.merge(a), 1);

    assert_eq!(forward.tasks, reverse.tasks);
    assert_eq!(forward.reviewer_feedback, reverse.reviewer_feedback);
    // Union order differs by arrival, but membership matches
    let mut f = forward.completed_ids.clone();
    let mut r = reverse.completed_ids.clone();
    f.sort();
    r.sort();
    assert_eq!(f, r);
}

#[test]
fn decision_last_write_wins() {
    let mut record = WorkflowRecord::new("decision");
    apply(&mut record, RecordDelta::decision(RouteDecision::Retry), 1);
    apply(&mut record, RecordDelta::decision(RouteDecision::Escalate), 1);
    assert_eq!(record.next_decision, RouteDecision::Escalate);
}
