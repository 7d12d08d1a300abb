//! End-to-end tests driving the default five-phase graph with mock
//! agents.

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use foreman::adapters::agents::{MockAgent, MockResponse};
use foreman::domain::models::{PhaseStatus, RouteDecision, WorkflowRecord};
use foreman::services::graph::{GraphDriver, Terminal};
use foreman::services::workflow::build_default_graph;
use foreman::services::RunContext;
use foreman::ErrorKind;

use common::{dependent_task_plan, fast_config, mock_registry, two_task_plan, FlakyAgent};

fn driver() -> GraphDriver {
    GraphDriver::new(build_default_graph().unwrap(), Duration::from_secs(5), 1)
}

fn record() -> WorkflowRecord {
    WorkflowRecord::with_phase_max_attempts("demo", 3)
}

#[tokio::test]
async fn run_completes_all_five_phases() {
    let ctx = RunContext::new(fast_config(), mock_registry(two_task_plan()).await);
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Completed);
    for phase in 1..=5 {
        assert_eq!(
            outcome.record.phase(phase).unwrap().status,
            PhaseStatus::Completed,
            "phase {phase} should be completed"
        );
    }
    assert_eq!(outcome.record.completed_ids, vec!["task-1", "task-2"]);
    assert!(outcome.record.failed_ids.is_empty());
    assert!(outcome.record.in_flight_ids.is_empty());
    assert!(outcome.record.plan.is_some());
    assert!(outcome.record.implementation_result.is_some());
    assert!(outcome.record.verification_feedback.is_some());

    // Both reviewer lenses left feedback
    assert!(outcome.record.reviewer_feedback.contains_key("architecture"));
    assert!(outcome.record.reviewer_feedback.contains_key("feasibility"));

    // Checkpoints from break_down and finalize
    let labels: Vec<&str> = outcome
        .record
        .checkpoints
        .iter()
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(labels, vec!["tasks-created", "run-complete"]);
}

#[tokio::test]
async fn dependent_tasks_execute_in_order() {
    let ctx = RunContext::new(fast_config(), mock_registry(dependent_task_plan()).await);
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Completed);
    // task-1 completed before task-2 became available
    assert_eq!(outcome.record.completed_ids, vec!["task-1", "task-2"]);
}

#[tokio::test]
async fn plan_rejection_retries_then_escalates() {
    let registry = {
        let planner = MockAgent::new();
        planner
            .respond_when("plan", MockResponse::success_json(two_task_plan()))
            .await;
        let reviewer = MockAgent::new();
        reviewer
            .respond_when(
                "Review this plan",
                MockResponse::success_json(json!({ "approved": false, "feedback": "too vague" })),
            )
            .await;

        let mut registry = mock_registry(two_task_plan()).await;
        registry.register("planner", Arc::new(planner));
        registry.register("reviewer", Arc::new(reviewer));
        registry
    };
    let ctx = RunContext::new(fast_config(), registry);
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Escalated);
    assert_eq!(
        outcome.record.phase(2).unwrap().status,
        PhaseStatus::Failed
    );
    // Attempt budget was honored, never exceeded
    let validation = outcome.record.phase(2).unwrap();
    assert_eq!(validation.attempts, validation.max_attempts);
    assert_eq!(outcome.record.next_decision, RouteDecision::Escalate);
    assert_eq!(
        outcome.record.reviewer_feedback.get("architecture").map(String::as_str),
        Some("too vague")
    );
}

#[tokio::test]
async fn failing_executor_retries_tasks_then_escalates() {
    let mut registry = mock_registry(two_task_plan()).await;
    registry.register(
        "executor",
        Arc::new(MockAgent::with_default_response(MockResponse::failure(
            "compile error",
        ))),
    );
    let ctx = RunContext::new(fast_config(), registry);
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Escalated);
    // Both tasks exhausted their attempt budgets
    assert_eq!(outcome.record.failed_ids, vec!["task-1", "task-2"]);
    for task in &outcome.record.tasks {
        assert_eq!(task.attempts, task.max_attempts);
        assert!(task.last_error.as_deref().unwrap().contains("compile error"));
    }
    // The permanent failure was reported with diagnostics
    let last = outcome.record.last_error().unwrap();
    assert_eq!(last.kind, ErrorKind::Assertion);
    assert!(last.snapshot.is_some());
}

#[tokio::test]
async fn failed_dependency_becomes_deadlock_and_escalates() {
    let mut registry = mock_registry(dependent_task_plan()).await;
    let executor = MockAgent::new();
    // task-1 always fails; task-2 would succeed but never runs
    executor
        .respond_when("task-1", MockResponse::failure("broken"))
        .await;
    registry.register("executor", Arc::new(executor));

    let ctx = RunContext::new(fast_config(), registry);
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Escalated);
    assert_eq!(outcome.record.failed_ids, vec!["task-1"]);
    // The deadlock was classified, logged, and escalated, not retried
    assert!(outcome
        .record
        .error_log
        .iter()
        .any(|e| e.kind == ErrorKind::Deadlock));
}

#[tokio::test]
async fn structural_plan_errors_escalate_without_retry() {
    // Duplicate task ids in the plan
    let bad_plan = json!({
        "milestones": [],
        "tasks": [
            { "id": "task-1", "title": "a" },
            { "id": "task-1", "title": "b" }
        ]
    });
    let ctx = RunContext::new(fast_config(), mock_registry(bad_plan).await);
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Escalated);
    assert!(outcome
        .record
        .error_log
        .iter()
        .any(|e| e.kind == ErrorKind::Validation));
    // Breakdown was not retried: phase 3 never completed
    assert_ne!(
        outcome.record.phase(3).unwrap().status,
        PhaseStatus::Completed
    );
}

#[tokio::test]
async fn transient_reviewer_failure_recovers_through_fixer() {
    let mut registry = mock_registry(two_task_plan()).await;
    let reviewer = Arc::new(FlakyAgent::new(1));
    registry.register("reviewer", Arc::clone(&reviewer) as Arc<dyn foreman::Agent>);

    let ctx = RunContext::new(fast_config(), registry);
    let outcome = driver().run(record(), &ctx).await;

    // First reviewer call failed at the invocation level, the driver
    // routed through the error handler, the fixer approved a retry,
    // and the run still completed.
    assert_eq!(outcome.terminal, Terminal::Completed);
    assert!(reviewer.calls() > 1);
    assert!(outcome
        .record
        .error_log
        .iter()
        .any(|e| e.kind == ErrorKind::Connection));
}

#[tokio::test]
async fn persistent_step_failure_exhausts_fixer_retries_and_escalates() {
    let mut registry = mock_registry(two_task_plan()).await;
    // Reviewer never recovers; the fixer ceiling must end the run
    registry.register("reviewer", Arc::new(FlakyAgent::new(u32::MAX)));

    let ctx = RunContext::new(fast_config(), registry);
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Escalated);
    // Bounded by the dispatcher's retry ceiling, not the step budget
    assert!(outcome.steps_executed < 50);
    let last = outcome.record.last_error().unwrap();
    assert!(last.retry_count >= 3);
}

#[tokio::test]
async fn fixer_disabled_escalates_on_step_failure() {
    let mut config = fast_config();
    config.fixer_enabled = false;

    let mut registry = mock_registry(two_task_plan()).await;
    registry.register("reviewer", Arc::new(FlakyAgent::new(1)));

    let ctx = RunContext::new(config, registry);
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Escalated);
}

#[tokio::test]
async fn open_circuit_breaker_escalates_on_step_failure() {
    let mut registry = mock_registry(two_task_plan()).await;
    registry.register("reviewer", Arc::new(FlakyAgent::new(1)));

    let ctx = RunContext::new(fast_config(), registry);
    ctx.dispatcher.open_circuit();
    let outcome = driver().run(record(), &ctx).await;

    assert_eq!(outcome.terminal, Terminal::Escalated);
}

#[tokio::test]
async fn persisted_record_round_trips_after_run() {
    let ctx = RunContext::new(fast_config(), mock_registry(two_task_plan()).await);
    let outcome = driver().run(record(), &ctx).await;

    let json = serde_json::to_string(&outcome.record).unwrap();
    let restored: WorkflowRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(outcome.record, restored);
    assert_eq!(restored.current_phase, 5);
    assert_eq!(restored.checkpoints.len(), 2);
}
