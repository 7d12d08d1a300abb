//! Subprocess agent implementation.
//!
//! Spawns an executor CLI process per invocation, passing the prompt
//! and pass-through options as flags, and captures stdout as the
//! result. When stdout parses as JSON it is also exposed as
//! `parsed_output`. Retry policy lives in the engine, not here.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{AgentConfig, AgentRequest, AgentResult};
use crate::domain::ports::Agent;

/// Agent that shells out to a configured executor CLI.
pub struct SubprocessAgent {
    config: AgentConfig,
}

impl SubprocessAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Build CLI arguments for a request. Options are passed through
    /// verbatim; their meaning belongs to the executor.
    fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec!["--print".to_string()];

        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        args.push("--model".to_string());
        args.push(model);

        if let Some(ref session_id) = request.options.session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }

        if let Some(ref schema) = request.options.output_schema {
            args.push("--output-schema".to_string());
            args.push(schema.clone());
        }

        if let Some(ceiling) = request.options.max_cost_usd {
            args.push("--max-cost".to_string());
            args.push(ceiling.to_string());
        }

        if request.options.plan_mode {
            args.push("--permission-mode".to_string());
            args.push("plan".to_string());
        }

        args.push("-p".to_string());
        args.push(request.prompt.clone());
        args
    }
}

#[async_trait]
impl Agent for SubprocessAgent {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn invoke(&self, request: AgentRequest) -> EngineResult<AgentResult> {
        let args = self.build_args(&request);
        debug!(binary = %self.config.binary_path, "Spawning executor process");

        let started = Instant::now();
        let output = Command::new(&self.config.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                EngineError::ExecutionFailed(format!(
                    "failed to spawn {}: {e}",
                    self.config.binary_path
                ))
            })?;
        let duration = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        let success = output.status.success();

        let parsed_output = serde_json::from_str::<serde_json::Value>(&stdout).ok();
        // Executors that report structured results may embed cost
        // metadata; surface it when present.
        let cost_usd = parsed_output
            .as_ref()
            .and_then(|v| v.get("total_cost_usd"))
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);

        Ok(AgentResult {
            success,
            output: stdout,
            parsed_output,
            error: if success { None } else { Some(stderr) },
            exit_code,
            duration,
            cost_usd,
            model: request.options.model,
        })
    }
}
