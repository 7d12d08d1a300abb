//! Domain errors for the Foreman orchestration engine.

use thiserror::Error;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Domain-level errors that can occur in the Foreman engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("Task {task} depends on unknown task {dependency}")]
    MissingDependency { task: String, dependency: String },

    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Phase not found: {0}")]
    PhaseNotFound(u8),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Scheduling deadlock: {pending} pending task(s) with unsatisfiable dependencies")]
    SchedulingDeadlock { pending: usize },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Invalid orchestration graph: {0}")]
    GraphInvalid(String),

    #[error("Step {step} timed out after {seconds}s")]
    StepTimeout { step: String, seconds: u64 },

    #[error("Agent invocation failed: {0}")]
    AgentFailed(String),

    #[error("Rate limiter {limiter} timed out after {waited_ms}ms")]
    RateLimitTimeout { limiter: String, waited_ms: u64 },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}
