use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use crate::model::{Monitor, MonitorId};

/// Definitions rejected at creation or edit time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("monitor '{monitor}' has an invalid target: {reason}")]
    InvalidTarget { monitor: MonitorId, reason: String },

    #[error("monitor '{monitor}' interval {interval:?} is below the minimum of {minimum:?}")]
    IntervalTooShort {
        monitor: MonitorId,
        interval: Duration,
        minimum: Duration,
    },

    #[error("monitor '{monitor}' has a channel with missing credentials: {reason}")]
    MissingCredentials { monitor: MonitorId, reason: String },

    #[error("invalid notification channel: {0}")]
    InvalidChannel(String),

    #[error("monitor '{0}' is already scheduled")]
    DuplicateMonitor(MonitorId),
}

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./uptime.db")
}

/// Inclusive range of HTTP status codes treated as success
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    pub fn contains(&self, code: u16) -> bool {
        (self.min..=self.max).contains(&code)
    }
}

fn default_accepted_status() -> Vec<StatusRange> {
    vec![StatusRange { min: 200, max: 399 }]
}

/// Bounded exponential backoff for transient infrastructure failures
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_base_for_backoff")]
    pub base_for_backoff: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            base_for_backoff: default_base_for_backoff(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_base_for_backoff() -> u32 {
    2
}

/// Tunables of the monitoring engine
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EngineConfig {
    /// Size of the probe worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Consecutive failures needed to go down
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes needed to come back up
    #[serde(default = "default_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_notification_timeout_secs")]
    pub notification_timeout_secs: u64,

    #[serde(default = "default_accepted_status")]
    pub accepted_status: Vec<StatusRange>,

    /// Echo requests sent per ping probe
    #[serde(default = "default_ping_count")]
    pub ping_count: u16,

    /// Poll storage for monitor changes at this interval (disabled if unset)
    pub reconcile_interval_secs: Option<u64>,

    #[serde(default)]
    pub persistence_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            failure_threshold: default_threshold(),
            success_threshold: default_threshold(),
            probe_timeout_secs: default_probe_timeout_secs(),
            min_interval_ms: default_min_interval_ms(),
            notification_timeout_secs: default_notification_timeout_secs(),
            accepted_status: default_accepted_status(),
            ping_count: default_ping_count(),
            reconcile_interval_secs: None,
            persistence_retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }
}

fn default_workers() -> usize {
    16
}

fn default_threshold() -> u32 {
    1
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_min_interval_ms() -> u64 {
    1_000
}

fn default_notification_timeout_secs() -> u64 {
    10
}

fn default_ping_count() -> u16 {
    1
}

/// HTTP mail relay used by email channels
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmailConfig {
    /// Endpoint accepting `{ from, to, subject, html }` as JSON
    pub url: String,
    pub from: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage configuration (defaults to SQLite)
    pub storage: Option<StorageConfig>,

    pub email: Option<EmailConfig>,

    /// Monitors upserted into storage on startup
    pub monitors: Option<Vec<Monitor>>,
}

/// Read a JSON configuration file, or TOML if the extension says so
pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)?;

    let parsed = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&file_content).map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
    } else {
        serde_json::from_str(&file_content)
            .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
    };

    parsed.inspect(|config| trace!("loaded config: {config:?}"))
}
