//! Shared helpers for integration tests.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use foreman::adapters::agents::{AgentRegistry, MockAgent, MockResponse};
use foreman::domain::models::{AgentRequest, AgentResult, BackoffConfig, Config};
use foreman::domain::ports::Agent;
use foreman::EngineResult;

/// A plan with two independent tasks under one milestone.
pub fn two_task_plan() -> serde_json::Value {
    json!({
        "milestones": ["core"],
        "tasks": [
            {
                "id": "task-1",
                "title": "Write the store",
                "priority": "high",
                "milestone": "core",
                "files_to_create": ["src/store.rs"]
            },
            {
                "id": "task-2",
                "title": "Write the index",
                "milestone": "core",
                "files_to_create": ["src/index.rs"]
            }
        ]
    })
}

/// A plan where the second task depends on the first.
pub fn dependent_task_plan() -> serde_json::Value {
    json!({
        "milestones": ["core"],
        "tasks": [
            {
                "id": "task-1",
                "title": "Write the store",
                "milestone": "core",
                "files_to_create": ["src/store.rs"]
            },
            {
                "id": "task-2",
                "title": "Write the index",
                "depends_on": ["task-1"],
                "milestone": "core",
                "files_to_create": ["src/index.rs"]
            }
        ]
    })
}

/// Test configuration with fast timeouts and backoff.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.step_timeout_secs = 5;
    config.backoff = BackoffConfig {
        base_secs: 0.01,
        max_secs: 0.05,
    };
    config
}

/// Registry with a scripted planner producing `plan`, plus
/// default-success reviewer/executor/fixer mocks.
pub async fn mock_registry(plan: serde_json::Value) -> AgentRegistry {
    let planner = MockAgent::new();
    planner
        .respond_when("plan", MockResponse::success_json(plan))
        .await;

    let mut registry = AgentRegistry::new();
    registry.register("planner", Arc::new(planner));
    registry.register("reviewer", Arc::new(MockAgent::new()));
    registry.register("executor", Arc::new(MockAgent::new()));
    registry.register("fixer", Arc::new(MockAgent::new()));
    registry
}

/// Agent whose first `fail_first` invocations return an invocation
/// error, then succeed. Used to exercise the driver's error boundary
/// and the fixer retry path.
pub struct FlakyAgent {
    fail_first: u32,
    calls: AtomicU32,
}

impl FlakyAgent {
    pub fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FlakyAgent {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn invoke(&self, _request: AgentRequest) -> EngineResult<AgentResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(foreman::EngineError::ExecutionFailed(
                "transient connection failure".to_string(),
            ))
        } else {
            Ok(AgentResult::ok("recovered"))
        }
    }
}
