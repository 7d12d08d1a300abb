//! Run context: the explicit registry bundle owned by one run.
//!
//! Everything a step may need — agents, rate limiters, the error
//! dispatcher, the scheduler, the phase machine, configuration — is
//! carried here and passed down, never reached through module-level
//! globals. Tests construct a fresh context per test.

use std::sync::Arc;

use crate::adapters::agents::AgentRegistry;
use crate::domain::models::Config;
use crate::services::dispatch::ErrorDispatcher;
use crate::services::phases::PhaseMachine;
use crate::services::rate_limiter::RateLimiterRegistry;
use crate::services::scheduler::TaskScheduler;

/// Shared context for one orchestration run.
pub struct RunContext {
    pub config: Config,
    pub agents: AgentRegistry,
    pub limiters: RateLimiterRegistry,
    pub dispatcher: Arc<ErrorDispatcher>,
    pub scheduler: TaskScheduler,
    pub phases: PhaseMachine,
}

impl RunContext {
    /// Build a context from configuration and a populated agent
    /// registry.
    pub fn new(config: Config, agents: AgentRegistry) -> Self {
        let limiters = RateLimiterRegistry::from_configs(&config.rate_limits, config.backoff);
        let dispatcher = Arc::new(ErrorDispatcher::new(config.fixer_enabled));
        let phases = PhaseMachine::new(config.phase_max_attempts);
        Self {
            config,
            agents,
            limiters,
            dispatcher,
            scheduler: TaskScheduler::new(),
            phases,
        }
    }

    /// Context with an empty agent registry, for engine-level tests
    /// that never reach an agent.
    pub fn for_tests(config: Config) -> Self {
        Self::new(config, AgentRegistry::new())
    }
}
