//! Kernel configuration.
//!
//! Every recognized option with its default. Durations are expressed in
//! seconds so they survive YAML and environment-variable overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ticket::RejectDisposition;

/// Root configuration for the orchestration kernel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KernelConfig {
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub board: BoardConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Heartbeat and registration timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Expected interval between agent heartbeats
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// An agent is unresponsive past this silence threshold
    #[serde(default = "default_ttl_threshold")]
    pub ttl_threshold_seconds: u64,

    /// Auto-restarts permitted inside one escalation window
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Window over which restarts are counted before escalating
    #[serde(default = "default_escalation_window")]
    pub escalation_window_seconds: u64,

    /// Registration is abandoned if no initial heartbeat arrives
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_seconds: u64,

    /// Cadence of the heartbeat-TTL sweeper
    #[serde(default = "default_heartbeat_sweep")]
    pub sweep_interval_seconds: u64,
}

const fn default_heartbeat_interval() -> u64 {
    15
}
const fn default_ttl_threshold() -> u64 {
    30
}
const fn default_max_restart_attempts() -> u32 {
    3
}
const fn default_escalation_window() -> u64 {
    3600
}
const fn default_registration_timeout() -> u64 {
    60
}
const fn default_heartbeat_sweep() -> u64 {
    5
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval(),
            ttl_threshold_seconds: default_ttl_threshold(),
            max_restart_attempts: default_max_restart_attempts(),
            escalation_window_seconds: default_escalation_window(),
            registration_timeout_seconds: default_registration_timeout(),
            sweep_interval_seconds: default_heartbeat_sweep(),
        }
    }
}

/// Scheduler limits and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulingConfig {
    #[serde(default = "default_max_concurrent_tickets")]
    pub max_concurrent_tickets: u32,

    /// Default in-progress timeout, overridable per phase
    #[serde(default = "default_task_timeout")]
    pub task_in_progress_timeout_seconds: u64,

    /// Hard cap on validation feedback iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

const fn default_max_concurrent_tickets() -> u32 {
    50
}
const fn default_task_timeout() -> u64 {
    1800
}
const fn default_max_iterations() -> u32 {
    10
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tickets: default_max_concurrent_tickets(),
            task_in_progress_timeout_seconds: default_task_timeout(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Validation loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    /// Whether new tasks enter the validation loop by default
    #[serde(default)]
    pub validation_enabled_default: bool,

    /// Per-iteration validator deadline
    #[serde(default = "default_validator_timeout")]
    pub validator_timeout_seconds: u64,

    /// Target P95 for validator spawn latency
    #[serde(default = "default_validator_startup_p95")]
    pub validator_startup_p95_seconds: u64,
}

const fn default_validator_timeout() -> u64 {
    1800
}
const fn default_validator_startup_p95() -> u64 {
    30
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            validation_enabled_default: false,
            validator_timeout_seconds: default_validator_timeout(),
            validator_startup_p95_seconds: default_validator_startup_p95(),
        }
    }
}

/// Human-approval gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ApprovalConfig {
    /// Whether agent-created tickets require human review
    #[serde(default)]
    pub ticket_human_review: bool,

    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_seconds: u64,

    /// Disposition of rejected / timed-out tickets
    #[serde(default)]
    pub on_reject: RejectDisposition,

    /// Cadence of the approval-deadline sweeper
    #[serde(default = "default_approval_sweep")]
    pub sweep_interval_seconds: u64,
}

const fn default_approval_timeout() -> u64 {
    1800
}
const fn default_approval_sweep() -> u64 {
    10
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            ticket_human_review: false,
            approval_timeout_seconds: default_approval_timeout(),
            on_reject: RejectDisposition::default(),
            sweep_interval_seconds: default_approval_sweep(),
        }
    }
}

/// Discovery branching and diagnostic monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiscoveryConfig {
    /// Discovery spawns may target phases outside allowed_transitions
    #[serde(default = "default_true")]
    pub allow_phase_bypass: bool,

    #[serde(default = "default_diag_cooldown")]
    pub diagnostic_cooldown_seconds: u64,

    /// Inactivity threshold before a workflow counts as stuck
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_seconds: u64,

    /// Cadence of the diagnostic monitor
    #[serde(default = "default_diag_interval")]
    pub monitor_interval_seconds: u64,

    /// Spawn a diagnostic after repeated validation failures
    #[serde(default = "default_true")]
    pub diag_on_validation_failures: bool,

    #[serde(default = "default_diag_failure_threshold")]
    pub diag_validation_failures_threshold: u32,
}

const fn default_true() -> bool {
    true
}
const fn default_diag_cooldown() -> u64 {
    60
}
const fn default_stuck_threshold() -> u64 {
    60
}
const fn default_diag_interval() -> u64 {
    60
}
const fn default_diag_failure_threshold() -> u32 {
    2
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            allow_phase_bypass: default_true(),
            diagnostic_cooldown_seconds: default_diag_cooldown(),
            stuck_threshold_seconds: default_stuck_threshold(),
            monitor_interval_seconds: default_diag_interval(),
            diag_on_validation_failures: default_true(),
            diag_validation_failures_threshold: default_diag_failure_threshold(),
        }
    }
}

/// Board overrides keyed by column name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BoardConfig {
    /// Per-column WIP limit overrides
    #[serde(default)]
    pub wip_limits: HashMap<String, u32>,

    /// Per-column auto-transition target overrides
    #[serde(default)]
    pub auto_transitions: HashMap<String, String>,

    /// Bound on the summarized context carried across phases, bytes
    #[serde(default = "default_context_summary_bytes")]
    pub context_summary_max_bytes: usize,
}

const fn default_context_summary_bytes() -> usize {
    4096
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            wip_limits: HashMap::new(),
            auto_transitions: HashMap::new(),
            context_summary_max_bytes: default_context_summary_bytes(),
        }
    }
}

/// Supervisor and anomaly thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    /// Window in which an action remains revertible
    #[serde(default = "default_revert_window")]
    pub revert_window_seconds: u64,
}

const fn default_anomaly_threshold() -> f64 {
    0.8
}
const fn default_revert_window() -> u64 {
    3600
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: default_anomaly_threshold(),
            revert_window_seconds: default_revert_window(),
        }
    }
}

/// Event bus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BusConfig {
    /// Bounded queue depth per subscriber
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue_capacity: usize,

    /// A consumer stuck at a full queue past this is disconnected
    #[serde(default = "default_slow_consumer_timeout")]
    pub slow_consumer_timeout_seconds: u64,

    /// Delivery retry: base delay
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Delivery retry: attempts before dead-lettering
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
}

const fn default_subscriber_queue() -> usize {
    256
}
const fn default_slow_consumer_timeout() -> u64 {
    30
}
const fn default_retry_base_ms() -> u64 {
    500
}
const fn default_retry_max_attempts() -> u32 {
    8
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: default_subscriber_queue(),
            slow_consumer_timeout_seconds: default_slow_consumer_timeout(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_attempts: default_retry_max_attempts(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".conductor/conductor.db".to_string()
}
const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional log directory for file output
    #[serde(default)]
    pub directory: Option<String>,
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
            directory: None,
        }
    }
}
