//! Error context model.
//!
//! An `ErrorContext` is a diagnostic record created at the moment of a
//! failure. It is consumed once by the error dispatcher and then
//! appended to the record's capped error log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification tag for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    RateLimit,
    MalformedOutput,
    Assertion,
    Permission,
    Authentication,
    BudgetExceeded,
    CircuitBreaker,
    Validation,
    Deadlock,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::RateLimit => "rate_limit",
            Self::MalformedOutput => "malformed_output",
            Self::Assertion => "assertion",
            Self::Permission => "permission",
            Self::Authentication => "authentication",
            Self::BudgetExceeded => "budget_exceeded",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Validation => "validation",
            Self::Deadlock => "deadlock",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this kind is recoverable by automated repair. Timeouts,
    /// connection failures, rate limits, malformed output, and test
    /// failures are transient by default; everything else needs a human
    /// or a structural fix.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Connection
                | Self::RateLimit
                | Self::MalformedOutput
                | Self::Assertion
        )
    }
}

/// Record fields that are safe to copy into an error snapshot. Task
/// bodies, plans, and agent outputs never appear here.
const SNAPSHOT_ALLOWLIST: &[&str] = &[
    "project",
    "current_phase",
    "next_decision",
    "task_count",
    "completed_count",
    "failed_count",
    "in_flight_count",
];

/// Diagnostic record created at the moment of failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Name of the step that produced the failure
    pub source_step: String,
    /// Classification tag
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Whether automated repair may be attempted
    pub recoverable: bool,
    /// Suggested remediation actions
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    /// How many repair attempts have already been made
    #[serde(default)]
    pub retry_count: u32,
    /// Sanitized snapshot of safe record fields at failure time
    #[serde(default)]
    pub snapshot: Option<BTreeMap<String, serde_json::Value>>,
    /// When the failure occurred
    pub occurred_at: DateTime<Utc>,
}

impl ErrorContext {
    /// Create a new context. Recoverability defaults to the static
    /// per-kind classification.
    pub fn new(source_step: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            source_step: source_step.into(),
            kind,
            message: message.into(),
            recoverable: kind.is_recoverable(),
            suggested_actions: Vec::new(),
            retry_count: 0,
            snapshot: None,
            occurred_at: Utc::now(),
        }
    }

    /// Override the recoverability flag.
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Set the repair retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Attach a snapshot, keeping only allowlisted fields.
    pub fn with_snapshot(mut self, fields: BTreeMap<String, serde_json::Value>) -> Self {
        let sanitized: BTreeMap<String, serde_json::Value> = fields
            .into_iter()
            .filter(|(k, _)| SNAPSHOT_ALLOWLIST.contains(&k.as_str()))
            .collect();
        self.snapshot = if sanitized.is_empty() {
            None
        } else {
            Some(sanitized)
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recoverability_classification() {
        assert!(ErrorKind::Timeout.is_recoverable());
        assert!(ErrorKind::Connection.is_recoverable());
        assert!(ErrorKind::MalformedOutput.is_recoverable());
        assert!(ErrorKind::Assertion.is_recoverable());
        assert!(!ErrorKind::Permission.is_recoverable());
        assert!(!ErrorKind::BudgetExceeded.is_recoverable());
        assert!(!ErrorKind::Deadlock.is_recoverable());
    }

    #[test]
    fn test_snapshot_is_sanitized() {
        let mut fields = BTreeMap::new();
        fields.insert("project".to_string(), json!("demo"));
        fields.insert("current_phase".to_string(), json!(3));
        fields.insert("plan".to_string(), json!("secret large plan body"));
        fields.insert("api_key".to_string(), json!("sk-123"));

        let ctx = ErrorContext::new("execute_tasks", ErrorKind::Timeout, "timed out")
            .with_snapshot(fields);

        let snapshot = ctx.snapshot.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("project"));
        assert!(!snapshot.contains_key("plan"));
        assert!(!snapshot.contains_key("api_key"));
    }

    #[test]
    fn test_empty_snapshot_collapses_to_none() {
        let mut fields = BTreeMap::new();
        fields.insert("plan".to_string(), json!("body"));
        let ctx =
            ErrorContext::new("step", ErrorKind::Unknown, "oops").with_snapshot(fields);
        assert!(ctx.snapshot.is_none());
    }
}
