//! Agent boundary types.
//!
//! The engine reaches executor processes only through the generic
//! agent contract: given a prompt and options, return success/failure,
//! text output, optional structured output, and cost/timing metadata.
//! The engine passes options through without interpreting them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pass-through invocation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOptions {
    /// Model identifier
    #[serde(default)]
    pub model: Option<String>,
    /// Session/resume token
    #[serde(default)]
    pub session_id: Option<String>,
    /// Reference to an output schema the executor should honor
    #[serde(default)]
    pub output_schema: Option<String>,
    /// Budget ceiling in USD
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    /// Ask the executor to plan without acting
    #[serde(default)]
    pub plan_mode: bool,
}

impl AgentOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_plan_mode(mut self, plan_mode: bool) -> Self {
        self.plan_mode = plan_mode;
        self
    }

    pub fn with_max_cost_usd(mut self, ceiling: f64) -> Self {
        self.max_cost_usd = Some(ceiling);
        self
    }
}

/// A single invocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: AgentOptions,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: AgentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of a single agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    /// Raw text output
    pub output: String,
    /// Structured output, when the executor produced parseable JSON
    #[serde(default)]
    pub parsed_output: Option<serde_json::Value>,
    /// Error text on failure
    #[serde(default)]
    pub error: Option<String>,
    pub exit_code: i32,
    /// Wall-clock duration of the invocation
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// Cost in USD as reported by the executor
    #[serde(default)]
    pub cost_usd: f64,
    /// Model that actually served the request
    #[serde(default)]
    pub model: Option<String>,
}

impl AgentResult {
    /// Successful result with plain text output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            parsed_output: None,
            error: None,
            exit_code: 0,
            duration: Duration::ZERO,
            cost_usd: 0.0,
            model: None,
        }
    }

    /// Failed result with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            parsed_output: None,
            error: Some(error.into()),
            exit_code: 1,
            duration: Duration::ZERO,
            cost_usd: 0.0,
            model: None,
        }
    }

    pub fn with_parsed_output(mut self, value: serde_json::Value) -> Self {
        self.parsed_output = Some(value);
        self
    }
}

/// Serialize durations as fractional seconds for the persisted shape.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors() {
        let ok = AgentResult::ok("done");
        assert!(ok.success);
        assert_eq!(ok.exit_code, 0);

        let failed = AgentResult::failed("boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_options_pass_through_round_trip() {
        let request = AgentRequest::new("implement task-1").with_options(
            AgentOptions::default()
                .with_model("sonnet")
                .with_plan_mode(true)
                .with_max_cost_usd(2.5),
        );
        let json = serde_json::to_string(&request).unwrap();
        let back: AgentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request, back);
        assert!(back.options.plan_mode);
    }

    #[test]
    fn test_duration_serializes_as_seconds() {
        let mut result = AgentResult::ok("x");
        result.duration = Duration::from_millis(1500);
        let json = serde_json::to_value(&result).unwrap();
        let secs = json.get("duration").and_then(serde_json::Value::as_f64).unwrap();
        assert!((secs - 1.5).abs() < 1e-9);
    }
}
