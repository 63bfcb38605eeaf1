//! Per-key retry configuration.

use drover_core::FaultKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Key of the fallback retry configuration.
pub const DEFAULT_RETRY_KEY: &str = "default";

/// Retry configuration for one config key (normally a capability name).
///
/// All durations are expressed in seconds and may be fractional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait before the second attempt for exponentially backed-off kinds.
    #[serde(default = "default_base_wait")]
    pub base_wait_secs: f64,

    /// Multiplier applied per attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Ceiling for exponential waits.
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: f64,

    /// Fixed waits per fault kind. Keys accept kind names or status codes.
    #[serde(default)]
    pub initial_wait_times: BTreeMap<FaultKind, f64>,

    /// Pacing delay after a successful attempt.
    #[serde(default = "default_success_wait")]
    pub success_wait_secs: f64,

    /// Fault kinds that may be retried.
    #[serde(default = "FaultKind::default_retryable")]
    pub retryable: BTreeSet<FaultKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_wait_secs: default_base_wait(),
            backoff_factor: default_backoff_factor(),
            max_wait_secs: default_max_wait(),
            initial_wait_times: BTreeMap::new(),
            success_wait_secs: default_success_wait(),
            retryable: FaultKind::default_retryable(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_wait() -> f64 {
    10.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_wait() -> f64 {
    960.0
}

fn default_success_wait() -> f64 {
    10.0
}

impl RetryConfig {
    /// Returns true if the kind is in the retryable allow-list.
    pub fn is_retryable(&self, kind: FaultKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Returns the base wait as a Duration.
    pub fn base_wait(&self) -> Duration {
        secs(self.base_wait_secs)
    }

    /// Returns the wait ceiling as a Duration.
    pub fn max_wait(&self) -> Duration {
        secs(self.max_wait_secs)
    }

    /// Returns the success pacing delay as a Duration.
    pub fn success_wait(&self) -> Duration {
        secs(self.success_wait_secs)
    }

    /// Returns the fixed wait override for a fault kind, if configured.
    pub fn initial_wait_for(&self, kind: FaultKind) -> Option<Duration> {
        self.initial_wait_times.get(&kind).map(|s| secs(*s))
    }

    /// Sets the fixed wait for a fault kind.
    #[must_use]
    pub fn with_initial_wait(mut self, kind: FaultKind, wait: Duration) -> Self {
        self.initial_wait_times.insert(kind, wait.as_secs_f64());
        self
    }

    /// Sets the success pacing delay.
    #[must_use]
    pub fn with_success_wait(mut self, wait: Duration) -> Self {
        self.success_wait_secs = wait.as_secs_f64();
        self
    }

    /// Replaces the retryable allow-list.
    #[must_use]
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = FaultKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_wait(), Duration::from_secs(10));
        assert_eq!(config.max_wait(), Duration::from_secs(960));
        assert_eq!(config.success_wait(), Duration::from_secs(10));
        assert!(config.is_retryable(FaultKind::RateLimit));
        assert!(!config.is_retryable(FaultKind::Authentication));
    }

    #[test]
    fn test_initial_wait_times_accept_status_codes() {
        let config: RetryConfig = toml::from_str(
            r#"
            max_retries = 5
            [initial_wait_times]
            "429" = 960
            capacity_unavailable = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_wait_for(FaultKind::RateLimit), Some(Duration::from_secs(960)));
        assert_eq!(
            config.initial_wait_for(FaultKind::CapacityUnavailable),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.initial_wait_for(FaultKind::Gateway), None);
    }

    #[test]
    fn test_unknown_retryable_kind_is_rejected() {
        let result: Result<RetryConfig, _> = toml::from_str(r#"retryable = ["network", "solar_flare"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_fractional_seconds() {
        let config = RetryConfig {
            base_wait_secs: 0.25,
            ..Default::default()
        };
        assert_eq!(config.base_wait(), Duration::from_millis(250));
    }
}
