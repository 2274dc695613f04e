use serde::{Deserialize, Serialize};

/// Main configuration structure for Steward
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Step retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-action circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Orchestrator limits
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".steward/steward.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
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

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
            retention_days: default_retention_days(),
        }
    }
}

/// Step retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries granted to steps that do not set their own
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential and linear backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay used by the immediate strategy
    #[serde(default = "default_immediate_delay_ms")]
    pub immediate_delay_ms: u64,

    /// Jitter applied to exponential delays, as a fraction (0.25 = ±25%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Deadline for a single tool invocation
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    2_000
}

const fn default_immediate_delay_ms() -> u64 {
    500
}

const fn default_jitter() -> f64 {
    0.25
}

const fn default_step_timeout_secs() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            immediate_delay_ms: default_immediate_delay_ms(),
            jitter: default_jitter(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerSettings {
    /// Recorded failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls before allowing a probe
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_secs() -> u64 {
    300
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

/// Orchestrator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorSettings {
    /// Validate-and-replan rounds before completion is forced
    #[serde(default = "default_max_replans")]
    pub max_replans: u64,

    /// Minimum goal length after trimming
    #[serde(default = "default_min_goal_length")]
    pub min_goal_length: usize,

    /// Tasks processed concurrently by the worker pool
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Steps of one wave executed concurrently
    #[serde(default = "default_max_step_concurrency")]
    pub max_step_concurrency: usize,

    /// Buffered progress events before slow subscribers lag
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

const fn default_max_replans() -> u64 {
    3
}

const fn default_min_goal_length() -> usize {
    10
}

const fn default_max_concurrent_tasks() -> usize {
    4
}

const fn default_max_step_concurrency() -> usize {
    8
}

const fn default_event_channel_capacity() -> usize {
    256
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_replans: default_max_replans(),
            min_goal_length: default_min_goal_length(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_step_concurrency: default_max_step_concurrency(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}
