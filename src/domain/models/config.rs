use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration structure for Foreman
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of concurrent executor workers (1-64)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Whether automated repair via the fixer agent is enabled
    #[serde(default = "default_fixer_enabled")]
    pub fixer_enabled: bool,

    /// Attempt-count delta above which two versions of a task are
    /// considered conflicting during merge
    #[serde(default = "default_conflict_attempt_threshold")]
    pub conflict_attempt_threshold: u32,

    /// Hard timeout per graph step, in seconds
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Attempt budget per phase
    #[serde(default = "default_phase_max_attempts")]
    pub phase_max_attempts: u32,

    /// Executor agent configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Named rate limiter configurations, one per executor class
    #[serde(default = "default_rate_limits")]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,

    /// Throttle backoff configuration
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_workers() -> usize {
    2
}

const fn default_fixer_enabled() -> bool {
    true
}

const fn default_conflict_attempt_threshold() -> u32 {
    1
}

const fn default_step_timeout_secs() -> u64 {
    600
}

const fn default_phase_max_attempts() -> u32 {
    3
}

fn default_rate_limits() -> BTreeMap<String, RateLimitConfig> {
    let mut limits = BTreeMap::new();
    limits.insert("executor".to_string(), RateLimitConfig::default());
    limits
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            fixer_enabled: default_fixer_enabled(),
            conflict_attempt_threshold: default_conflict_attempt_threshold(),
            step_timeout_secs: default_step_timeout_secs(),
            phase_max_attempts: default_phase_max_attempts(),
            agent: AgentConfig::default(),
            rate_limits: default_rate_limits(),
            backoff: BackoffConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Executor agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Path to the executor CLI binary
    #[serde(default = "default_binary_path")]
    pub binary_path: String,

    /// Default model for execution and review calls
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model for planning calls (falls back to `default_model`)
    #[serde(default)]
    pub plan_model: Option<String>,
}

fn default_binary_path() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            default_model: default_model(),
            plan_model: None,
        }
    }
}

/// Per-limiter ceilings across five dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,

    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: u64,

    #[serde(default = "default_cost_per_hour")]
    pub cost_per_hour: f64,

    #[serde(default = "default_cost_per_day")]
    pub cost_per_day: f64,
}

const fn default_requests_per_minute() -> u32 {
    30
}

const fn default_requests_per_hour() -> u32 {
    500
}

const fn default_tokens_per_minute() -> u64 {
    200_000
}

const fn default_cost_per_hour() -> f64 {
    20.0
}

const fn default_cost_per_day() -> f64 {
    100.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            requests_per_hour: default_requests_per_hour(),
            tokens_per_minute: default_tokens_per_minute(),
            cost_per_hour: default_cost_per_hour(),
            cost_per_day: default_cost_per_day(),
        }
    }
}

/// Throttle backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackoffConfig {
    /// Base delay in seconds
    #[serde(default = "default_backoff_base_secs")]
    pub base_secs: f64,

    /// Maximum delay in seconds
    #[serde(default = "default_backoff_max_secs")]
    pub max_secs: f64,
}

const fn default_backoff_base_secs() -> f64 {
    0.5
}

const fn default_backoff_max_secs() -> f64 {
    60.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: default_backoff_base_secs(),
            max_secs: default_backoff_max_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
