//! Application configuration structures.

use crate::{RetryConfig, DEFAULT_RETRY_KEY};
use drover_core::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Ledger persistence configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Orchestrator configuration.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Retry configurations keyed by config key.
    #[serde(default = "default_retry_map")]
    pub retry: BTreeMap<String, RetryConfig>,

    /// Retrieval capability settings.
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppMetadata::default(),
            ledger: LedgerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            retry: default_retry_map(),
            capabilities: CapabilitiesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_retry_map() -> BTreeMap<String, RetryConfig> {
    let mut map = BTreeMap::new();
    map.insert(DEFAULT_RETRY_KEY.to_string(), RetryConfig::default());
    map
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "drover".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Ledger storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    /// One JSON document on disk.
    #[default]
    Json,
    /// Embedded SQLite database.
    Sqlite,
}

/// Ledger persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: LedgerBackend,

    /// Path of the JSON ledger document.
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,

    /// SQLite connection URL.
    #[serde(default = "default_sqlite_url")]
    pub sqlite_url: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            path: default_ledger_path(),
            sqlite_url: default_sqlite_url(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/state/request_manager_state.json")
}

fn default_sqlite_url() -> String {
    "sqlite://data/state/drover.db?mode=rwc".to_string()
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of workers draining the scheduler.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Priority assigned to submissions that omit one.
    #[serde(default = "default_priority")]
    pub default_priority: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            default_priority: default_priority(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_priority() -> i64 {
    100
}

/// Retrieval capability settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Settings for the day-windowed social feed capability.
    #[serde(default)]
    pub xtwitter: XTwitterConfig,
}

/// Settings for the day-windowed social feed capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XTwitterConfig {
    /// Base URL of the upstream proxy.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Extra headers sent with each request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Look-back when a query has no `since:` bound.
    #[serde(default = "default_timeframe_months")]
    pub default_timeframe_months: u32,

    /// Pause between consecutive day windows, in seconds.
    #[serde(default = "default_pacing")]
    pub pacing_secs: f64,

    /// Directory retrieved items are written under.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for XTwitterConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            headers: BTreeMap::new(),
            request_timeout_secs: default_request_timeout(),
            default_timeframe_months: default_timeframe_months(),
            pacing_secs: default_pacing(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_timeframe_months() -> u32 {
    3
}

fn default_pacing() -> f64 {
    5.0
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl XTwitterConfig {
    /// Returns the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the pause between day windows as Duration.
    pub fn pacing(&self) -> Duration {
        Duration::try_from_secs_f64(self.pacing_secs.max(0.0)).unwrap_or(Duration::ZERO)
    }
}

impl AppConfig {
    /// Returns the retry configuration for a key, falling back to the
    /// `default` entry and then to built-in defaults.
    pub fn retry_config(&self, key: &str) -> RetryConfig {
        self.retry
            .get(key)
            .or_else(|| self.retry.get(DEFAULT_RETRY_KEY))
            .cloned()
            .unwrap_or_default()
    }
}
