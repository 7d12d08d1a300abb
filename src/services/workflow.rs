//! Built-in five-phase workflow graph.
//!
//! Wires the engine components into the standard lifecycle: plan,
//! validate the plan with parallel reviewers, break the plan into
//! tasks, execute task batches through the scheduler and rate limiter,
//! verify, finalize. A shared error-handling step consults the
//! dispatcher to choose between the fixer agent and human escalation.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    AgentOptions, AgentRequest, AgentResult, ErrorContext, ErrorKind, PhaseStatus, RouteDecision,
    Task, TaskPriority, TaskStatus, WorkflowRecord,
};
use crate::services::context::RunContext;
use crate::services::dispatch::{suggested_actions, DispatchDecision};
use crate::services::graph::{OrchestrationGraph, Step, Transition};
use crate::services::reducers::{preview, RecordDelta};
use crate::services::scheduler::ScheduleOutcome;

/// Rough admission estimates per executor call; actual usage is
/// recorded post-call.
const ESTIMATED_TOKENS: u64 = 2_000;
const ESTIMATED_COST_USD: f64 = 0.05;

/// Invoke a role's agent through its rate limiter (falling back to the
/// shared `executor` limiter), recording actual usage afterwards.
async fn invoke_agent(
    ctx: &RunContext,
    role: &str,
    request: AgentRequest,
) -> EngineResult<AgentResult> {
    let agent = ctx.agents.get(role)?;
    let limiter = ctx
        .limiters
        .get(role)
        .or_else(|| ctx.limiters.get("executor"));

    if let Some(ref limiter) = limiter {
        limiter
            .acquire(
                ESTIMATED_TOKENS,
                ESTIMATED_COST_USD,
                Some(Duration::from_secs(ctx.config.step_timeout_secs)),
            )
            .await?;
    }

    let result = agent.invoke(request).await?;

    if let Some(ref limiter) = limiter {
        // Text length over four is a serviceable token estimate when
        // the executor does not report usage itself.
        let tokens = (result.output.len() / 4) as u64;
        limiter.record_usage(tokens, result.cost_usd).await;
    }
    Ok(result)
}

/// Pull an `approved` flag out of a reviewer result; a reviewer that
/// returns no structured verdict counts as approval.
fn is_approved(result: &AgentResult) -> bool {
    result
        .parsed_output
        .as_ref()
        .and_then(|v| v.get("approved"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(result.success)
}

fn feedback_text(result: &AgentResult) -> String {
    result
        .parsed_output
        .as_ref()
        .and_then(|v| v.get("feedback"))
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| result.output.clone(), ToString::to_string)
}

// ============================================================================
// Steps
// ============================================================================

/// Phase 1: ask the planner agent for a plan.
pub struct PlanStep;

#[async_trait]
impl Step for PlanStep {
    fn name(&self) -> &str {
        "plan"
    }

    async fn run(&self, record: &WorkflowRecord, ctx: &RunContext) -> EngineResult<RecordDelta> {
        let mut delta = ctx.phases.begin(record, 1)?;
        let staged = preview(record, &delta, ctx.config.conflict_attempt_threshold);

        let mut prompt = format!("Produce an implementation plan for project {}.", record.project);
        if let Some(feedback) = &record.validation_feedback {
            prompt.push_str(&format!(" Address prior review feedback: {feedback}"));
        }
        let options = AgentOptions::default()
            .with_plan_mode(true)
            .with_model(
                ctx.config
                    .agent
                    .plan_model
                    .clone()
                    .unwrap_or_else(|| ctx.config.agent.default_model.clone()),
            );
        let result = invoke_agent(ctx, "planner", AgentRequest::new(prompt).with_options(options)).await?;

        if result.success {
            let plan = result
                .parsed_output
                .clone()
                .unwrap_or_else(|| json!({ "text": result.output }));
            delta = delta.merge(ctx.phases.complete(&staged, 1, Some(plan.clone()))?);
            delta.plan = Some(plan);
        } else {
            let message = result.error.unwrap_or_else(|| "planner failed".to_string());
            delta = delta.merge(ctx.phases.fail(&staged, 1, &message)?);
            delta.errors.push(ErrorContext::new(
                self.name(),
                ErrorKind::MalformedOutput,
                message,
            ));
        }
        Ok(delta)
    }
}

/// Phase 2: two reviewers examine the plan in parallel against the
/// same record snapshot; their feedback is merged through the
/// reducers, never applied piecemeal.
pub struct ValidatePlanStep;

#[async_trait]
impl Step for ValidatePlanStep {
    fn name(&self) -> &str {
        "validate_plan"
    }

    async fn run(&self, record: &WorkflowRecord, ctx: &RunContext) -> EngineResult<RecordDelta> {
        let mut delta = ctx.phases.begin(record, 2)?;
        let staged = preview(record, &delta, ctx.config.conflict_attempt_threshold);
        let plan = record
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::ValidationFailed("no plan to validate".to_string()))?;

        let lenses = ["architecture", "feasibility"];
        let reviews = join_all(lenses.iter().map(|lens| {
            let prompt = format!("Review this plan for {lens} problems: {plan}");
            invoke_agent(ctx, "reviewer", AgentRequest::new(prompt))
        }))
        .await;

        let mut approved = true;
        let mut feedback = serde_json::Map::new();
        for (lens, review) in lenses.iter().zip(reviews) {
            let review = review?;
            approved &= is_approved(&review);
            let text = feedback_text(&review);
            delta
                .reviewer_feedback
                .insert((*lens).to_string(), text.clone());
            feedback.insert((*lens).to_string(), json!(text));
        }

        let feedback = serde_json::Value::Object(feedback);
        if approved {
            info!("Plan approved by all reviewers");
            delta = delta.merge(ctx.phases.complete(&staged, 2, Some(feedback.clone()))?);
        } else {
            warn!("Plan rejected by review");
            delta = delta.merge(ctx.phases.fail(&staged, 2, "plan rejected by review")?);
        }
        delta.validation_feedback = Some(feedback);
        Ok(delta)
    }
}

/// Entry to phase 3: turn the approved plan into tasks and milestones.
/// Structural problems (unparseable plan, id collisions, missing
/// dependencies, cycles) are never retried; they surface as errors.
pub struct BreakDownStep;

#[async_trait]
impl Step for BreakDownStep {
    fn name(&self) -> &str {
        "break_down"
    }

    async fn run(&self, record: &WorkflowRecord, ctx: &RunContext) -> EngineResult<RecordDelta> {
        let mut delta = ctx.phases.begin(record, 3)?;
        let plan = record
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::ValidationFailed("no plan to break down".to_string()))?;

        let (tasks, milestones) = parse_plan(plan, ctx.config.phase_max_attempts)?;
        validate_task_structure(&tasks)?;

        info!(tasks = tasks.len(), milestones = milestones.len(), "Plan broken into tasks");
        delta.tasks = tasks;
        delta.milestones = Some(milestones);
        delta.checkpoint_label = Some("tasks-created".to_string());
        Ok(delta)
    }
}

/// Phase 3 execution loop: schedule a conflict-free batch, dispatch
/// each task to the executor agent concurrently, and merge outcomes.
pub struct ExecuteTasksStep;

#[async_trait]
impl Step for ExecuteTasksStep {
    fn name(&self) -> &str {
        "execute_tasks"
    }

    async fn run(&self, record: &WorkflowRecord, ctx: &RunContext) -> EngineResult<RecordDelta> {
        match ctx.scheduler.schedule(record, ctx.config.workers) {
            ScheduleOutcome::AllDone => {
                let summary = json!({
                    "completed": record.completed_ids,
                    "failed": record.failed_ids,
                });
                let mut delta = ctx.phases.complete(record, 3, Some(summary.clone()))?;
                delta.implementation_result = Some(summary);
                delta.in_flight_ids = Some(Vec::new());
                Ok(delta)
            }
            ScheduleOutcome::Deadlock { pending } => {
                Err(EngineError::SchedulingDeadlock {
                    pending: pending.len(),
                })
            }
            ScheduleOutcome::Batch(batch) if batch.is_empty() => {
                // Remaining tasks failed for good: retrying cannot
                // help, so escalate with diagnostics attached.
                let message =
                    format!("{} task(s) failed permanently", record.failed_ids.len());
                let mut delta = RecordDelta::error(
                    ErrorContext::new(self.name(), ErrorKind::Assertion, message)
                        .with_recoverable(false)
                        .with_snapshot(record.snapshot_fields()),
                );
                delta.next_decision = Some(RouteDecision::Escalate);
                Ok(delta)
            }
            ScheduleOutcome::Batch(batch) => {
                debug!(batch = ?batch, "Executing task batch");
                // The scheduler marks the batch in progress and in
                // flight; those copies are the starting point for the
                // post-invocation statuses below.
                let mut delta = ctx.scheduler.delta_for_batch(record, &batch);
                let mut marked: std::collections::HashMap<String, Task> = delta
                    .tasks
                    .drain(..)
                    .map(|t| (t.id.clone(), t))
                    .collect();

                let invocations = join_all(batch.iter().map(|id| {
                    let task = record.task(id);
                    async move {
                        let Some(task) = task else {
                            return (id.clone(), Err(EngineError::TaskNotFound(id.clone())));
                        };
                        let prompt = format!("Implement task {}: {}", task.id, task.title);
                        (id.clone(), invoke_agent(ctx, "executor", AgentRequest::new(prompt)).await)
                    }
                }))
                .await;

                let mut outcome = RecordDelta::default();
                for (id, invocation) in invocations {
                    let Some(mut task) = marked.remove(&id) else { continue };
                    task.attempts += 1;

                    match invocation {
                        Ok(result) if result.success => {
                            task.status = TaskStatus::Completed;
                            task.notes.push(format!("attempt {} succeeded", task.attempts));
                            outcome.completed_ids.push(id);
                        }
                        Ok(result) => {
                            let error = result
                                .error
                                .unwrap_or_else(|| "executor reported failure".to_string());
                            task.last_error = Some(error.clone());
                            task.notes.push(format!("attempt {} failed: {error}", task.attempts));
                            if task.attempts < task.max_attempts {
                                task.status = TaskStatus::Pending;
                            } else {
                                task.status = TaskStatus::Failed;
                                outcome.failed_ids.push(id.clone());
                                outcome.errors.push(
                                    ErrorContext::new(self.name(), ErrorKind::Assertion, error)
                                        .with_retry_count(task.attempts),
                                );
                            }
                        }
                        Err(err) => {
                            // Invocation-level failure (spawn, rate
                            // limit timeout): the task gets another
                            // chance, the error is logged.
                            task.last_error = Some(err.to_string());
                            task.status = if task.attempts < task.max_attempts {
                                TaskStatus::Pending
                            } else {
                                TaskStatus::Failed
                            };
                            if task.status == TaskStatus::Failed {
                                outcome.failed_ids.push(id.clone());
                            }
                            outcome.errors.push(ErrorContext::new(
                                self.name(),
                                ErrorKind::Connection,
                                err.to_string(),
                            ));
                        }
                    }
                    outcome.tasks.push(task);
                }

                outcome.in_flight_ids = Some(Vec::new());
                outcome.next_decision = Some(RouteDecision::Continue);
                delta = delta.merge(outcome);
                Ok(delta)
            }
        }
    }
}

/// Phase 4: a reviewer verifies the implementation.
pub struct VerifyStep;

#[async_trait]
impl Step for VerifyStep {
    fn name(&self) -> &str {
        "verify"
    }

    async fn run(&self, record: &WorkflowRecord, ctx: &RunContext) -> EngineResult<RecordDelta> {
        let mut delta = ctx.phases.begin(record, 4)?;
        let staged = preview(record, &delta, ctx.config.conflict_attempt_threshold);
        let summary = record
            .implementation_result
            .clone()
            .unwrap_or_else(|| json!(null));

        let prompt = format!(
            "Verify the implementation for project {}. Result summary: {summary}",
            record.project
        );
        let result = invoke_agent(ctx, "reviewer", AgentRequest::new(prompt)).await?;

        let feedback = json!({ "verdict": feedback_text(&result) });
        if is_approved(&result) {
            delta = delta.merge(ctx.phases.complete(&staged, 4, Some(feedback.clone()))?);
        } else {
            delta = delta.merge(ctx.phases.fail(&staged, 4, "verification rejected")?);
        }
        delta.verification_feedback = Some(feedback);
        Ok(delta)
    }
}

/// Phase 5: checkpoint and close out the run.
pub struct FinalizeStep;

#[async_trait]
impl Step for FinalizeStep {
    fn name(&self) -> &str {
        "finalize"
    }

    async fn run(&self, record: &WorkflowRecord, ctx: &RunContext) -> EngineResult<RecordDelta> {
        let mut delta = ctx.phases.begin(record, 5)?;
        let staged = preview(record, &delta, ctx.config.conflict_attempt_threshold);
        delta = delta.merge(ctx.phases.complete(&staged, 5, None)?);
        delta.checkpoint_label = Some("run-complete".to_string());
        delta.next_decision = Some(RouteDecision::Continue);
        Ok(delta)
    }
}

/// Shared failure handling: consult the dispatcher, then either run
/// the fixer agent and retry, or escalate to a human.
pub struct HandleErrorStep;

#[async_trait]
impl Step for HandleErrorStep {
    fn name(&self) -> &str {
        "handle_error"
    }

    async fn run(&self, record: &WorkflowRecord, ctx: &RunContext) -> EngineResult<RecordDelta> {
        let Some(context) = record.last_error().cloned() else {
            // Nothing to handle; resume normally.
            return Ok(RecordDelta::decision(RouteDecision::Continue));
        };

        match ctx.dispatcher.dispatch(&context) {
            DispatchDecision::UseHuman => {
                warn!(kind = context.kind.as_str(), "Escalating failure to human");
                Ok(RecordDelta::decision(RouteDecision::Escalate))
            }
            DispatchDecision::UseFixer => {
                info!(kind = context.kind.as_str(), "Routing failure to fixer agent");
                let actions = if context.suggested_actions.is_empty() {
                    suggested_actions(context.kind, &context.message)
                } else {
                    context.suggested_actions.clone()
                };
                let prompt = format!(
                    "Repair this failure from step {}: {}. Suggested actions: {}",
                    context.source_step,
                    context.message,
                    actions.join("; ")
                );
                let result = invoke_agent(ctx, "fixer", AgentRequest::new(prompt)).await?;

                let mut delta = RecordDelta::default();
                let mut updated = context;
                updated.retry_count += 1;
                updated.suggested_actions = actions;
                delta.errors.push(updated);
                delta.next_decision = Some(if result.success {
                    RouteDecision::Retry
                } else {
                    RouteDecision::Escalate
                });
                Ok(delta)
            }
        }
    }
}

// ============================================================================
// Graph assembly
// ============================================================================

/// Step to resume at when the fixer asks for a retry, derived from the
/// phase that is currently active.
fn retry_target(record: &WorkflowRecord) -> &'static str {
    match record.current_phase {
        1 | 2 => "plan",
        3 => "execute_tasks",
        4 => "verify",
        _ => "finalize",
    }
}

/// Build the standard five-phase orchestration graph.
pub fn build_default_graph() -> EngineResult<OrchestrationGraph> {
    OrchestrationGraph::builder("plan")
        .step(Arc::new(PlanStep))
        .step(Arc::new(ValidatePlanStep))
        .step(Arc::new(BreakDownStep))
        .step(Arc::new(ExecuteTasksStep))
        .step(Arc::new(VerifyStep))
        .step(Arc::new(FinalizeStep))
        .step(Arc::new(HandleErrorStep))
        .route(
            "plan",
            &["plan", "validate_plan"],
            Arc::new(|record| match record.next_decision {
                RouteDecision::Continue => Transition::Goto("validate_plan".to_string()),
                RouteDecision::Retry => Transition::Goto("plan".to_string()),
                _ => Transition::End,
            }),
        )
        .route(
            "validate_plan",
            &["plan", "break_down"],
            Arc::new(|record| match record.next_decision {
                RouteDecision::Continue => Transition::Goto("break_down".to_string()),
                RouteDecision::Retry => Transition::Goto("plan".to_string()),
                _ => Transition::End,
            }),
        )
        .route(
            "break_down",
            &["execute_tasks"],
            Arc::new(|record| match record.next_decision {
                RouteDecision::Continue => Transition::Goto("execute_tasks".to_string()),
                _ => Transition::End,
            }),
        )
        .route(
            "execute_tasks",
            &["execute_tasks", "verify"],
            Arc::new(|record| match record.next_decision {
                RouteDecision::Continue | RouteDecision::Retry => {
                    if record
                        .phase(3)
                        .map(|p| p.status == PhaseStatus::Completed)
                        .unwrap_or(false)
                    {
                        Transition::Goto("verify".to_string())
                    } else {
                        Transition::Goto("execute_tasks".to_string())
                    }
                }
                _ => Transition::End,
            }),
        )
        .route(
            "verify",
            &["verify", "finalize"],
            Arc::new(|record| match record.next_decision {
                RouteDecision::Continue => Transition::Goto("finalize".to_string()),
                RouteDecision::Retry => Transition::Goto("verify".to_string()),
                _ => Transition::End,
            }),
        )
        .route("finalize", &[], Arc::new(|_| Transition::End))
        .route(
            "handle_error",
            &["plan", "execute_tasks", "verify", "finalize"],
            Arc::new(|record| match record.next_decision {
                RouteDecision::Retry | RouteDecision::Continue => {
                    Transition::Goto(retry_target(record).to_string())
                }
                _ => Transition::End,
            }),
        )
        .on_error("handle_error")
        .build()
}

/// Parse the planner's structured output into tasks and milestones.
///
/// Expected shape:
/// `{ "milestones": ["m1", ...], "tasks": [{ "id", "title", "priority",
/// "depends_on", "milestone", "files_to_create", "files_to_modify" }] }`
fn parse_plan(
    plan: &serde_json::Value,
    max_attempts: u32,
) -> EngineResult<(Vec<Task>, Vec<String>)> {
    let milestones: Vec<String> = plan
        .get("milestones")
        .and_then(serde_json::Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    let raw_tasks = plan
        .get("tasks")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            EngineError::ValidationFailed("plan has no task list".to_string())
        })?;

    let mut tasks = Vec::with_capacity(raw_tasks.len());
    for raw in raw_tasks {
        let id = raw
            .get("id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EngineError::ValidationFailed("task without id in plan".to_string()))?;
        let title = raw
            .get("title")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(id);

        let mut task = Task::new(id, title);
        task.max_attempts = max_attempts;
        if let Some(priority) = raw
            .get("priority")
            .and_then(serde_json::Value::as_str)
            .and_then(TaskPriority::from_str)
        {
            task.priority = priority;
        }
        if let Some(milestone) = raw.get("milestone").and_then(serde_json::Value::as_str) {
            task.milestone = Some(milestone.to_string());
        }
        task.depends_on = string_list(raw, "depends_on");
        task.files_to_create = string_list(raw, "files_to_create");
        task.files_to_modify = string_list(raw, "files_to_modify");
        task.validate()?;
        tasks.push(task);
    }

    Ok((tasks, milestones))
}

fn string_list(raw: &serde_json::Value, field: &str) -> Vec<String> {
    raw.get(field)
        .and_then(serde_json::Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Structural validation for a freshly parsed task list: unique ids,
/// known dependencies, acyclic graph.
fn validate_task_structure(tasks: &[Task]) -> EngineResult<()> {
    let mut ids = std::collections::HashSet::new();
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(EngineError::DuplicateTaskId(task.id.clone()));
        }
    }
    for task in tasks {
        for dep in &task.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(EngineError::MissingDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    if let Some(cycle) = crate::domain::models::record::detect_cycle(tasks) {
        return Err(EngineError::DependencyCycle(cycle));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_graph_validates() {
        assert!(build_default_graph().is_ok());
    }

    #[test]
    fn test_parse_plan_happy_path() {
        let plan = json!({
            "milestones": ["core", "polish"],
            "tasks": [
                {
                    "id": "task-1",
                    "title": "Write the parser",
                    "priority": "high",
                    "milestone": "core",
                    "files_to_create": ["src/parser.rs"]
                },
                {
                    "id": "task-2",
                    "title": "Wire the CLI",
                    "depends_on": ["task-1"],
                    "files_to_modify": ["src/main.rs"]
                }
            ]
        });
        let (tasks, milestones) = parse_plan(&plan, 3).unwrap();
        assert_eq!(milestones, vec!["core", "polish"]);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert_eq!(tasks[1].depends_on, vec!["task-1"]);
    }

    #[test]
    fn test_parse_plan_rejects_missing_tasks() {
        let plan = json!({ "milestones": [] });
        assert!(matches!(
            parse_plan(&plan, 3),
            Err(EngineError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validate_task_structure_rejects_collision_and_cycle() {
        let tasks = vec![Task::new("task-1", "a"), Task::new("task-1", "b")];
        assert!(matches!(
            validate_task_structure(&tasks),
            Err(EngineError::DuplicateTaskId(_))
        ));

        let tasks = vec![
            Task::new("task-1", "a").with_dependency("task-2"),
            Task::new("task-2", "b").with_dependency("task-1"),
        ];
        assert!(matches!(
            validate_task_structure(&tasks),
            Err(EngineError::DependencyCycle(_))
        ));

        let tasks = vec![Task::new("task-1", "a").with_dependency("ghost")];
        assert!(matches!(
            validate_task_structure(&tasks),
            Err(EngineError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_retry_target_follows_phase() {
        let mut record = WorkflowRecord::new("demo");
        assert_eq!(retry_target(&record), "plan");
        record.current_phase = 3;
        assert_eq!(retry_target(&record), "execute_tasks");
        record.current_phase = 4;
        assert_eq!(retry_target(&record), "verify");
        record.current_phase = 5;
        assert_eq!(retry_target(&record), "finalize");
    }

    #[test]
    fn test_is_approved_reads_structured_verdict() {
        let mut result = AgentResult::ok("looks good");
        assert!(is_approved(&result));

        result.parsed_output = Some(json!({ "approved": false, "feedback": "missing tests" }));
        assert!(!is_approved(&result));
        assert_eq!(feedback_text(&result), "missing tests");
    }
}
