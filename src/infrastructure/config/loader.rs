use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid workers: {0}. Must be between 1 and 64")]
    InvalidWorkers(usize),

    #[error("Invalid step timeout: {0}. Must be positive")]
    InvalidStepTimeout(u64),

    #[error("Invalid phase max_attempts: {0}. Cannot be 0")]
    InvalidPhaseMaxAttempts(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Rate limiter {name}: {field} must be positive")]
    InvalidRateLimit { name: String, field: &'static str },

    #[error(
        "Invalid backoff configuration: base_secs ({0}) must be positive and no greater than max_secs ({1})"
    )]
    InvalidBackoff(f64, f64),

    #[error("Agent binary path cannot be empty")]
    EmptyAgentBinary,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .foreman/config.yaml (project config)
    /// 3. .foreman/local.yaml (project local overrides, optional)
    /// 4. Environment variables (FOREMAN_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".foreman/config.yaml"))
            .merge(Yaml::file(".foreman/local.yaml"))
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.workers == 0 || config.workers > 64 {
            return Err(ConfigError::InvalidWorkers(config.workers));
        }

        if config.step_timeout_secs == 0 {
            return Err(ConfigError::InvalidStepTimeout(config.step_timeout_secs));
        }

        if config.phase_max_attempts == 0 {
            return Err(ConfigError::InvalidPhaseMaxAttempts(
                config.phase_max_attempts,
            ));
        }

        if config.agent.binary_path.trim().is_empty() {
            return Err(ConfigError::EmptyAgentBinary);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        for (name, limit) in &config.rate_limits {
            if limit.requests_per_minute == 0 {
                return Err(ConfigError::InvalidRateLimit {
                    name: name.clone(),
                    field: "requests_per_minute",
                });
            }
            if limit.requests_per_hour == 0 {
                return Err(ConfigError::InvalidRateLimit {
                    name: name.clone(),
                    field: "requests_per_hour",
                });
            }
            if limit.tokens_per_minute == 0 {
                return Err(ConfigError::InvalidRateLimit {
                    name: name.clone(),
                    field: "tokens_per_minute",
                });
            }
            if limit.cost_per_hour <= 0.0 {
                return Err(ConfigError::InvalidRateLimit {
                    name: name.clone(),
                    field: "cost_per_hour",
                });
            }
            if limit.cost_per_day <= 0.0 {
                return Err(ConfigError::InvalidRateLimit {
                    name: name.clone(),
                    field: "cost_per_day",
                });
            }
        }

        if config.backoff.base_secs <= 0.0 || config.backoff.base_secs > config.backoff.max_secs {
            return Err(ConfigError::InvalidBackoff(
                config.backoff.base_secs,
                config.backoff.max_secs,
            ));
        }

        Ok(())
    }
}
