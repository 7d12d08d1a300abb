//! Orchestration graph driver.
//!
//! A directed graph of named steps. Each step reads the record, may
//! call an external agent, and returns a partial update merged through
//! the reducers; a router then inspects the merged record and names
//! the next step. The driver loops until a terminal marker.
//!
//! Every step-level error is caught at the driver boundary, converted
//! into an `ErrorContext`, appended to the capped error log, and
//! turned into a routing decision; the driver never lets a failure
//! terminate a run ungracefully. A timed-out step is a non-retryable
//! failure distinct from classified errors: it routes straight to
//! escalation rather than through the transient-retry path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{ErrorContext, ErrorKind, RouteDecision, WorkflowRecord};
use crate::services::context::RunContext;
use crate::services::reducers::{apply, RecordDelta};

/// Hard ceiling on steps per run; a runaway routing loop escalates
/// instead of spinning forever.
const MAX_STEPS: usize = 1000;

/// A named unit of the orchestration graph.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Read the record, do the work, return a partial update.
    async fn run(&self, record: &WorkflowRecord, ctx: &RunContext) -> EngineResult<RecordDelta>;
}

/// Where to go after a step's delta has been merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Goto(String),
    End,
}

/// Router: inspects the merged record and picks the next step.
pub type Router = Arc<dyn Fn(&WorkflowRecord) -> Transition + Send + Sync>;

/// How a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Completed,
    Escalated,
    Aborted,
}

/// Final result of driving a graph.
#[derive(Debug)]
pub struct RunOutcome {
    pub record: WorkflowRecord,
    pub terminal: Terminal,
    pub steps_executed: usize,
}

/// A validated orchestration graph: step and router registries plus
/// the entry step name.
pub struct OrchestrationGraph {
    steps: HashMap<String, Arc<dyn Step>>,
    routers: HashMap<String, Router>,
    entry: String,
    /// Step to route to when a step fails; when absent or when the
    /// error step itself fails, the run escalates directly.
    error_step: Option<String>,
}

impl OrchestrationGraph {
    pub fn builder(entry: impl Into<String>) -> GraphBuilder {
        GraphBuilder {
            entry: entry.into(),
            steps: HashMap::new(),
            routers: HashMap::new(),
            declared_targets: Vec::new(),
            error_step: None,
        }
    }
}

/// Builder that validates the graph at construction time: the entry
/// step, the error step, and every declared router target must name a
/// registered step.
pub struct GraphBuilder {
    entry: String,
    steps: HashMap<String, Arc<dyn Step>>,
    routers: HashMap<String, Router>,
    declared_targets: Vec<(String, Vec<String>)>,
    error_step: Option<String>,
}

impl GraphBuilder {
    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.insert(step.name().to_string(), step);
        self
    }

    /// Attach a router to a step, declaring the step names it may
    /// return so they can be checked up front.
    pub fn route(
        mut self,
        step: impl Into<String>,
        targets: &[&str],
        router: Router,
    ) -> Self {
        let step = step.into();
        self.declared_targets.push((
            step.clone(),
            targets.iter().map(|s| (*s).to_string()).collect(),
        ));
        self.routers.insert(step, router);
        self
    }

    pub fn on_error(mut self, step: impl Into<String>) -> Self {
        self.error_step = Some(step.into());
        self
    }

    pub fn build(self) -> EngineResult<OrchestrationGraph> {
        if !self.steps.contains_key(&self.entry) {
            return Err(EngineError::GraphInvalid(format!(
                "entry step {} is not registered",
                self.entry
            )));
        }
        if let Some(ref error_step) = self.error_step {
            if !self.steps.contains_key(error_step) {
                return Err(EngineError::GraphInvalid(format!(
                    "error step {error_step} is not registered"
                )));
            }
        }
        for (step, targets) in &self.declared_targets {
            if !self.steps.contains_key(step) {
                return Err(EngineError::GraphInvalid(format!(
                    "router attached to unregistered step {step}"
                )));
            }
            for target in targets {
                if !self.steps.contains_key(target) {
                    return Err(EngineError::GraphInvalid(format!(
                        "router for {step} declares unregistered target {target}"
                    )));
                }
            }
        }
        Ok(OrchestrationGraph {
            steps: self.steps,
            routers: self.routers,
            entry: self.entry,
            error_step: self.error_step,
        })
    }
}

/// Drives a graph over a record until terminal.
pub struct GraphDriver {
    graph: OrchestrationGraph,
    step_timeout: Duration,
    conflict_threshold: u32,
}

impl GraphDriver {
    pub fn new(graph: OrchestrationGraph, step_timeout: Duration, conflict_threshold: u32) -> Self {
        Self {
            graph,
            step_timeout,
            conflict_threshold,
        }
    }

    /// Run the graph to a terminal state. Never returns `Err` for
    /// step-level failures; those surface as an escalated outcome
    /// with diagnostics in the record's error log.
    pub async fn run(&self, mut record: WorkflowRecord, ctx: &RunContext) -> RunOutcome {
        let mut current = self.graph.entry.clone();
        let mut steps_executed = 0usize;
        let mut handling_error = false;

        loop {
            if steps_executed >= MAX_STEPS {
                error!(step = %current, "Step budget exhausted, escalating");
                let context = ErrorContext::new(
                    current.clone(),
                    ErrorKind::Unknown,
                    format!("run exceeded {MAX_STEPS} steps"),
                )
                .with_snapshot(record.snapshot_fields());
                apply(
                    &mut record,
                    RecordDelta::error(context)
                        .merge(RecordDelta::decision(RouteDecision::Escalate)),
                    self.conflict_threshold,
                );
                return self.finish(record, Terminal::Escalated, steps_executed);
            }

            let Some(step) = self.graph.steps.get(&current) else {
                // Unreachable for validated graphs with declared
                // targets, but routers are arbitrary functions.
                let context = ErrorContext::new(
                    current.clone(),
                    ErrorKind::Validation,
                    format!("router returned unregistered step {current}"),
                );
                apply(
                    &mut record,
                    RecordDelta::error(context)
                        .merge(RecordDelta::decision(RouteDecision::Escalate)),
                    self.conflict_threshold,
                );
                return self.finish(record, Terminal::Escalated, steps_executed);
            };

            debug!(step = %current, "Running step");
            steps_executed += 1;

            let outcome = tokio::time::timeout(self.step_timeout, step.run(&record, ctx)).await;

            match outcome {
                Err(_elapsed) => {
                    // Timeouts bypass the classified-error path so a
                    // hang is never masked as ordinary flakiness.
                    error!(step = %current, timeout_secs = self.step_timeout.as_secs(), "Step timed out");
                    let context = ErrorContext::new(
                        current.clone(),
                        ErrorKind::Timeout,
                        format!("step timed out after {}s", self.step_timeout.as_secs()),
                    )
                    .with_recoverable(false)
                    .with_snapshot(record.snapshot_fields());
                    apply(
                        &mut record,
                        RecordDelta::error(context)
                            .merge(RecordDelta::decision(RouteDecision::Escalate)),
                        self.conflict_threshold,
                    );
                    return self.finish(record, Terminal::Escalated, steps_executed);
                }
                Ok(Err(err)) => {
                    let mut context = classify(&current, &err)
                        .with_snapshot(record.snapshot_fields());
                    // A step failing the same way repeatedly inherits the
                    // prior retry count, so the dispatcher's ceiling
                    // eventually routes it to a human.
                    if let Some(prev) = record.last_error() {
                        if prev.source_step == context.source_step && prev.kind == context.kind {
                            context.retry_count = prev.retry_count + 1;
                        }
                    }
                    apply(
                        &mut record,
                        RecordDelta::error(context),
                        self.conflict_threshold,
                    );

                    match (&self.graph.error_step, handling_error) {
                        (Some(error_step), false) => {
                            debug!(step = %current, error = %err, "Step failed, routing to error handler");
                            handling_error = true;
                            current = error_step.clone();
                            continue;
                        }
                        _ => {
                            error!(step = %current, error = %err, "Step failed with no handler, escalating");
                            apply(
                                &mut record,
                                RecordDelta::decision(RouteDecision::Escalate),
                                self.conflict_threshold,
                            );
                            return self.finish(record, Terminal::Escalated, steps_executed);
                        }
                    }
                }
                Ok(Ok(delta)) => {
                    handling_error = false;
                    apply(&mut record, delta, self.conflict_threshold);

                    let transition = self
                        .graph
                        .routers
                        .get(&current)
                        .map_or(Transition::End, |router| router(&record));

                    match transition {
                        Transition::Goto(next) => current = next,
                        Transition::End => {
                            let terminal = match record.next_decision {
                                RouteDecision::Escalate => Terminal::Escalated,
                                RouteDecision::Abort => Terminal::Aborted,
                                _ => Terminal::Completed,
                            };
                            return self.finish(record, terminal, steps_executed);
                        }
                    }
                }
            }
        }
    }

    fn finish(&self, record: WorkflowRecord, terminal: Terminal, steps_executed: usize) -> RunOutcome {
        info!(?terminal, steps_executed, "Run finished");
        RunOutcome {
            record,
            terminal,
            steps_executed,
        }
    }

    /// Fan out several steps against one record snapshot and merge
    /// their deltas in registration order before anything touches the
    /// record. No step ever observes a partially-merged record.
    pub async fn run_parallel(
        steps: &[Arc<dyn Step>],
        record: &WorkflowRecord,
        ctx: &RunContext,
    ) -> EngineResult<RecordDelta> {
        let futures = steps.iter().map(|step| step.run(record, ctx));
        let results = futures::future::join_all(futures).await;

        let mut merged = RecordDelta::default();
        for result in results {
            merged = merged.merge(result?);
        }
        Ok(merged)
    }
}

/// Map an engine error to a classified error context.
fn classify(step: &str, err: &EngineError) -> ErrorContext {
    let kind = match err {
        EngineError::StepTimeout { .. } => ErrorKind::Timeout,
        EngineError::RateLimitTimeout { .. } => ErrorKind::RateLimit,
        EngineError::AgentFailed(_) | EngineError::ExecutionFailed(_) => ErrorKind::Connection,
        EngineError::SerializationError(_) => ErrorKind::MalformedOutput,
        EngineError::SchedulingDeadlock { .. } => ErrorKind::Deadlock,
        EngineError::ValidationFailed(_)
        | EngineError::DependencyCycle(_)
        | EngineError::DuplicateTaskId(_)
        | EngineError::MissingDependency { .. }
        | EngineError::InvalidStateTransition { .. } => ErrorKind::Validation,
        _ => ErrorKind::Unknown,
    };
    let mut context = ErrorContext::new(step, kind, err.to_string());
    context.suggested_actions =
        crate::services::dispatch::suggested_actions(kind, &context.message);
    context
}
