use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("REDLINE")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?.add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("REDLINE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("engine.default_timeout_seconds", default_timeout_seconds() as i64)?
            .set_default("engine.recursion_limit", default_recursion_limit() as i64)?
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.poll_interval_seconds", default_poll_interval_seconds() as i64)?
            .set_default("batch.default_max_concurrency", default_batch_concurrency() as i64)?
            .set_default("batch.max_concurrency_limit", default_concurrency_limit() as i64)?
            .set_default("batch.max_completed_batches", default_max_completed_batches() as i64)?
            .set_default("audit.retention_days", default_retention_days() as i64)?
            .set_default("audit.cleanup_interval_hours", default_cleanup_interval_hours() as i64)?
            .set_default("audit.log_to_tracing", true)?
            .set_default("telemetry.service_name", default_service_name())
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied when a template does not carry its own
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// Maximum number of state transitions per execution
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,
}

impl EngineConfig {
    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_timeout_seconds(),
            recursion_limit: default_recursion_limit(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_recursion_limit() -> u32 {
    25
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

impl SchedulerConfig {
    pub fn with_poll_interval(mut self, seconds: u64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

fn default_poll_interval_seconds() -> u64 {
    60
}

/// Batch processing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_concurrency")]
    pub default_max_concurrency: usize,
    #[serde(default = "default_concurrency_limit")]
    pub max_concurrency_limit: usize,
    /// Finished batches kept for status reads
    #[serde(default = "default_max_completed_batches")]
    pub max_completed_batches: usize,
}

impl BatchConfig {
    /// Resolve a requested concurrency against the configured bounds
    pub fn effective_concurrency(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_max_concurrency)
            .clamp(1, self.max_concurrency_limit.max(1))
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_max_concurrency: default_batch_concurrency(),
            max_concurrency_limit: default_concurrency_limit(),
            max_completed_batches: default_max_completed_batches(),
        }
    }
}

fn default_batch_concurrency() -> usize {
    5
}

fn default_concurrency_limit() -> usize {
    50
}

fn default_max_completed_batches() -> usize {
    1000
}

/// Audit retention configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
    /// Mirror audit events into the tracing output
    #[serde(default = "default_true")]
    pub log_to_tracing: bool,
}

impl AuditConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours.max(1) * 3600)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
            log_to_tracing: true,
        }
    }
}

fn default_retention_days() -> u32 {
    90
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "redline-worker".to_string()
}

fn default_true() -> bool {
    true
}
