//! Configuration loading.
//!
//! Hierarchical merge: programmatic defaults, then the project config
//! file, then local overrides, then `CONDUCTOR_`-prefixed environment
//! variables. Configuration is project-local so multiple kernels can
//! coexist on one machine.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::KernelConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("heartbeat ttl_threshold ({0}s) must exceed heartbeat_interval ({1}s)")]
    TtlBelowInterval(u64, u64),

    #[error("max_iterations must be at least 1")]
    ZeroMaxIterations,

    #[error("bus retry_max_attempts must be at least 1")]
    ZeroRetryAttempts,

    #[error("context_summary_max_bytes must be at least 256")]
    SummaryBoundTooSmall(usize),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `.conductor/` and the environment.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .conductor/config.yaml (project config, created by init)
    /// 3. .conductor/local.yaml (local overrides, optional)
    /// 4. Environment variables (CONDUCTOR_* prefix)
    pub fn load() -> Result<KernelConfig> {
        let config: KernelConfig = Figment::new()
            .merge(Serialized::defaults(KernelConfig::default()))
            .merge(Yaml::file(".conductor/config.yaml"))
            .merge(Yaml::file(".conductor/local.yaml"))
            .merge(Env::prefixed("CONDUCTOR_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<KernelConfig> {
        let config: KernelConfig = Figment::new()
            .merge(Serialized::defaults(KernelConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &KernelConfig) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.heartbeat.ttl_threshold_seconds <= config.heartbeat.heartbeat_interval_seconds {
            return Err(ConfigError::TtlBelowInterval(
                config.heartbeat.ttl_threshold_seconds,
                config.heartbeat.heartbeat_interval_seconds,
            ));
        }
        if config.scheduling.max_iterations == 0 {
            return Err(ConfigError::ZeroMaxIterations);
        }
        if config.bus.retry_max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if config.board.context_summary_max_bytes < 256 {
            return Err(ConfigError::SummaryBoundTooSmall(config.board.context_summary_max_bytes));
        }

        Ok(())
    }
}

/// Commented starter config written by `conductor init`.
pub const DEFAULT_CONFIG_YAML: &str = r#"# Conductor kernel configuration.
# Every value shown is the default; uncomment to override.

heartbeat:
  heartbeat_interval_seconds: 15
  ttl_threshold_seconds: 30
  max_restart_attempts: 3
  escalation_window_seconds: 3600
  registration_timeout_seconds: 60

scheduling:
  max_concurrent_tickets: 50
  task_in_progress_timeout_seconds: 1800
  max_iterations: 10

validation:
  validation_enabled_default: false
  validator_timeout_seconds: 1800

approval:
  ticket_human_review: false
  approval_timeout_seconds: 1800
  on_reject: archive

discovery:
  allow_phase_bypass: true
  diagnostic_cooldown_seconds: 60
  stuck_threshold_seconds: 60
  diag_on_validation_failures: true
  diag_validation_failures_threshold: 2

# board:
#   wip_limits:
#     building: 3
#   auto_transitions:
#     validated: done

database:
  path: .conductor/conductor.db

logging:
  level: info
  format: pretty
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = KernelConfig::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_ttl_must_exceed_interval() {
        let config = KernelConfig {
            heartbeat: crate::domain::models::HeartbeatConfig {
                ttl_threshold_seconds: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::TtlBelowInterval(10, 15))
        ));
    }

    #[test]
    fn test_default_yaml_parses_to_defaults() {
        let parsed: KernelConfig = serde_yaml::from_str(DEFAULT_CONFIG_YAML).unwrap();
        assert_eq!(parsed.heartbeat.heartbeat_interval_seconds, 15);
        assert_eq!(parsed.scheduling.max_iterations, 10);
        assert!(ConfigLoader::validate(&parsed).is_ok());
    }
}
