//! Configuration management for the scoring loop

use crate::error::PipelineError;
use crate::types::alert::RiskLevelThresholds;
use crate::types::scored::{Threshold, DEFAULT_THRESHOLD};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Prefix for environment overrides, e.g. `FRAUD_SENTINEL__STORE__DATABASE_URL`
pub const ENV_PREFIX: &str = "FRAUD_SENTINEL";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transaction source endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Endpoint returning one transaction per GET
    pub transaction_url: String,
    /// Liveness endpoint, separate from the transaction endpoint
    pub health_url: String,
    /// Bound on a single fetch, in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

/// Scoring artifact configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Path to the versioned ONNX artifact
    pub path: PathBuf,
    /// Version label recorded in logs
    #[serde(default = "default_model_version")]
    pub version: String,
    /// Optional JSON feature schema; the built-in v1 schema is used when absent
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Bound on a single scoring call, in milliseconds
    #[serde(default = "default_score_timeout_ms")]
    pub score_timeout_ms: u64,
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Probability at or above which a transaction is flagged
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Risk level labels attached to alerts
    #[serde(default)]
    pub risk_levels: RiskLevelThresholds,
}

/// Polling loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Normal cadence between cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Cadence after a failed fetch
    #[serde(default = "default_failure_backoff_secs")]
    pub failure_backoff_secs: u64,
    /// Number of independent loop instances
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How often each instance logs its run summary
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
    /// Bound on a single store write, in milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Bound on a single alert delivery, in milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub notify_timeout_ms: u64,
}

/// Result store backend
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    /// Non-durable, for dry runs
    Memory,
}

/// Result store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Connection string; usually supplied through the environment
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_table")]
    pub table: String,
}

/// Alert transport
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertMethod {
    #[default]
    Log,
    Nats,
    Webhook,
}

/// Alert sink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub method: AlertMethod,
    #[serde(default)]
    pub nats_url: Option<String>,
    #[serde(default = "default_alert_subject")]
    pub nats_subject: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}

fn default_model_version() -> String {
    "v1".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

fn default_score_timeout_ms() -> u64 {
    1_000
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_failure_backoff_secs() -> u64 {
    10
}

fn default_workers() -> usize {
    1
}

fn default_summary_interval_secs() -> u64 {
    300
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_table() -> String {
    "fraud_transactions".to_string()
}

fn default_alert_subject() -> String {
    "fraud.alerts".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            risk_levels: RiskLevelThresholds::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            failure_backoff_secs: default_failure_backoff_secs(),
            workers: default_workers(),
            summary_interval_secs: default_summary_interval_secs(),
            store_timeout_ms: default_io_timeout_ms(),
            notify_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            method: AlertMethod::Log,
            nats_url: None,
            nats_subject: default_alert_subject(),
            webhook_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }
}

impl AppConfig {
    /// Load configuration from a specific path plus environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app.validate().context("Configuration is invalid")?;
        Ok(app)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        Threshold::new(self.detection.threshold)?;

        let invalid = |msg: &str| Err(PipelineError::Config(msg.to_string()));

        if self.pipeline.poll_interval_secs == 0 {
            return invalid("pipeline.poll_interval_secs must be positive");
        }
        if self.pipeline.failure_backoff_secs == 0 {
            return invalid("pipeline.failure_backoff_secs must be positive");
        }
        if self.pipeline.workers == 0 {
            return invalid("pipeline.workers must be at least 1");
        }
        if self.pipeline.summary_interval_secs == 0 {
            return invalid("pipeline.summary_interval_secs must be positive");
        }
        if self.source.fetch_timeout_ms == 0
            || self.model.score_timeout_ms == 0
            || self.pipeline.store_timeout_ms == 0
            || self.pipeline.notify_timeout_ms == 0
        {
            return invalid("timeouts must be positive");
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_empty() {
            return invalid("store.database_url is required for the postgres backend");
        }
        match self.alerts.method {
            AlertMethod::Nats if self.alerts.nats_url.is_none() => {
                invalid("alerts.nats_url is required when alerts.method = \"nats\"")
            }
            AlertMethod::Webhook if self.alerts.webhook_url.is_none() => {
                invalid("alerts.webhook_url is required when alerts.method = \"webhook\"")
            }
            _ => Ok(()),
        }
    }

    /// Validated decision threshold
    pub fn threshold(&self) -> Result<Threshold, PipelineError> {
        Threshold::new(self.detection.threshold)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                transaction_url: "http://localhost:5000/transaction".to_string(),
                health_url: "http://localhost:5000/health".to_string(),
                fetch_timeout_ms: default_fetch_timeout_ms(),
            },
            model: ModelConfig {
                path: PathBuf::from("models/v1/fraud_detection_pipeline.onnx"),
                version: default_model_version(),
                schema_path: None,
                onnx_threads: default_onnx_threads(),
                score_timeout_ms: default_score_timeout_ms(),
            },
            detection: DetectionConfig::default(),
            pipeline: PipelineConfig::default(),
            store: StoreConfig {
                backend: StoreBackend::Memory,
                database_url: String::new(),
                max_connections: default_max_connections(),
                connect_timeout_ms: default_connect_timeout_ms(),
                table: default_table(),
            },
            alerts: AlertsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
