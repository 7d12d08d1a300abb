//! Foreman - Workflow Orchestration Engine
//!
//! Foreman coordinates long-running, multi-phase software-development
//! work by dispatching tasks to external executor agents, merging
//! their results into a single shared record through a reducer layer,
//! and routing between named steps of an orchestration graph until
//! the run completes or escalates to a human.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Pure models and the agent port
//! - **Service Layer** (`services`): Reducers, scheduler, phase machine,
//!   error dispatcher, rate limiter, and the graph driver
//! - **Adapters** (`adapters`): Agent implementations (mock, subprocess)
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use foreman::domain::models::WorkflowRecord;
//! use foreman::services::{GraphDriver, RunContext};
//! use foreman::services::workflow::build_default_graph;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let graph = build_default_graph()?;
//!     // Build a RunContext with agents, then drive a record to terminal.
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{EngineError, EngineResult};
pub use domain::models::{
    AgentOptions, AgentRequest, AgentResult, Config, ErrorContext, ErrorKind, PhaseState,
    PhaseStatus, RouteDecision, Task, TaskPriority, TaskStatus, WorkflowPhase, WorkflowRecord,
};
pub use domain::ports::Agent;
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    DispatchDecision, ErrorDispatcher, GraphDriver, OrchestrationGraph, PhaseMachine,
    RateLimiter, RateLimiterRegistry, RecordDelta, RunContext, ScheduleOutcome, TaskScheduler,
};
