//! Agent registry.
//!
//! Maps logical agent roles (planner, reviewer, executor, fixer) to
//! concrete `Agent` implementations. Owned by the run context; tests
//! construct a fresh registry per test.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::Agent;

/// Name -> agent mapping.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under a role name. Later registrations for
    /// the same role replace earlier ones.
    pub fn register(&mut self, role: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.insert(role.into(), agent);
    }

    /// Register the same agent under every given role.
    pub fn register_for_roles(&mut self, roles: &[&str], agent: Arc<dyn Agent>) {
        for role in roles {
            self.register(*role, Arc::clone(&agent));
        }
    }

    pub fn get(&self, role: &str) -> EngineResult<Arc<dyn Agent>> {
        self.agents
            .get(role)
            .cloned()
            .ok_or_else(|| EngineError::AgentFailed(format!("no agent registered for role {role}")))
    }

    pub fn roles(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::mock::MockAgent;

    #[test]
    fn test_register_and_get() {
        let mut registry = AgentRegistry::new();
        registry.register("planner", Arc::new(MockAgent::new()));
        assert!(registry.get("planner").is_ok());
        assert!(registry.get("fixer").is_err());
    }

    #[test]
    fn test_register_for_roles() {
        let mut registry = AgentRegistry::new();
        registry.register_for_roles(&["executor", "fixer"], Arc::new(MockAgent::new()));
        assert!(registry.get("executor").is_ok());
        assert!(registry.get("fixer").is_ok());
    }
}
