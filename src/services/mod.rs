//! Service layer: the orchestration engine proper.

pub mod context;
pub mod dispatch;
pub mod graph;
pub mod phases;
pub mod rate_limiter;
pub mod reducers;
pub mod scheduler;
pub mod workflow;

pub use context::RunContext;
pub use dispatch::{DispatchDecision, ErrorDispatcher};
pub use graph::{GraphDriver, OrchestrationGraph, RunOutcome, Step, Terminal, Transition};
pub use phases::PhaseMachine;
pub use rate_limiter::{RateLimiter, RateLimiterRegistry, RateLimiterStats};
pub use reducers::RecordDelta;
pub use scheduler::{ScheduleOutcome, TaskScheduler};
