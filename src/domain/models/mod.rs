//! Domain models for the Foreman engine.

pub mod agent;
pub mod config;
pub mod error_context;
pub mod phase;
pub mod record;
pub mod task;

pub use agent::{AgentOptions, AgentRequest, AgentResult};
pub use config::{AgentConfig, BackoffConfig, Config, LoggingConfig, RateLimitConfig};
pub use error_context::{ErrorContext, ErrorKind};
pub use phase::{PhaseState, PhaseStatus, WorkflowPhase};
pub use record::{
    Checkpoint, PhaseSnapshot, RouteDecision, WorkflowRecord, ERROR_LOG_CAP, ID_HISTORY_CAP,
};
pub use task::{Task, TaskPriority, TaskStatus};
