//! Mock agent for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::errors::EngineResult;
use crate::domain::models::{AgentRequest, AgentResult};
use crate::domain::ports::Agent;

/// Scripted response configuration.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Output text
    pub output: String,
    /// Structured output, if any
    pub parsed_output: Option<serde_json::Value>,
    /// Whether to simulate failure
    pub fail: bool,
    /// Error message if failing
    pub error_message: Option<String>,
    /// Simulated cost in USD
    pub cost_usd: f64,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            output: "Mock invocation completed successfully.".to_string(),
            parsed_output: None,
            fail: false,
            error_message: None,
            cost_usd: 0.01,
        }
    }
}

impl MockResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn success_json(value: serde_json::Value) -> Self {
        Self {
            output: value.to_string(),
            parsed_output: Some(value),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Mock agent with substring-keyed scripted responses and an
/// invocation log.
pub struct MockAgent {
    default_response: MockResponse,
    /// (prompt substring, response) pairs checked in insertion order
    scripted: Arc<RwLock<Vec<(String, MockResponse)>>>,
    invocations: Arc<RwLock<Vec<AgentRequest>>>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self {
            default_response: MockResponse::default(),
            scripted: Arc::new(RwLock::new(Vec::new())),
            invocations: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_default_response(response: MockResponse) -> Self {
        Self {
            default_response: response,
            scripted: Arc::new(RwLock::new(Vec::new())),
            invocations: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Script a response for prompts containing the given substring.
    pub async fn respond_when(&self, prompt_contains: impl Into<String>, response: MockResponse) {
        let mut scripted = self.scripted.write().await;
        scripted.push((prompt_contains.into(), response));
    }

    /// All requests seen so far.
    pub async fn invocations(&self) -> Vec<AgentRequest> {
        self.invocations.read().await.clone()
    }

    pub async fn invocation_count(&self) -> usize {
        self.invocations.read().await.len()
    }

    async fn response_for(&self, prompt: &str) -> MockResponse {
        let scripted = self.scripted.read().await;
        scripted
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn invoke(&self, request: AgentRequest) -> EngineResult<AgentResult> {
        let response = self.response_for(&request.prompt).await;
        {
            let mut invocations = self.invocations.write().await;
            invocations.push(request);
        }

        let mut result = if response.fail {
            AgentResult::failed(
                response
                    .error_message
                    .unwrap_or_else(|| "mock failure".to_string()),
            )
        } else {
            let mut result = AgentResult::ok(response.output);
            result.parsed_output = response.parsed_output;
            result
        };
        result.cost_usd = response.cost_usd;
        result.duration = Duration::from_millis(1);
        result.model = Some("mock".to_string());
        Ok(result)
    }
}
