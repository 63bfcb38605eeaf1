//! Fault-aware retry policy.

use crate::sleep_or_cancel;
use drover_config::{AppConfig, RetryConfig, DEFAULT_RETRY_KEY};
use drover_core::{DroverError, FaultKind};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Counter incremented each time a failed attempt is retried.
pub const RETRIES_TOTAL: &str = "drover_retries_total";

/// Errors the retry executor can classify and synthesize.
pub trait Retryable: Sized {
    /// Returns the fault kind of this error, or `None` for errors outside the
    /// taxonomy (those are never retried).
    fn fault_kind(&self) -> Option<FaultKind>;

    /// The error returned when shutdown interrupts a backoff wait.
    fn interrupted() -> Self;
}

impl Retryable for DroverError {
    fn fault_kind(&self) -> Option<FaultKind> {
        DroverError::fault_kind(self)
    }

    fn interrupted() -> Self {
        DroverError::Interrupted
    }
}

/// Computes the wait before the attempt following `attempt` (1-based).
///
/// A fixed override for `kind` wins regardless of the attempt number.
/// Otherwise the wait grows as `base_wait * backoff_factor^(attempt - 1)`,
/// capped at `max_wait`.
pub fn backoff_wait(config: &RetryConfig, kind: FaultKind, attempt: u32) -> Duration {
    if let Some(wait) = config.initial_wait_for(kind) {
        return wait;
    }

    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let secs = (config.base_wait_secs * config.backoff_factor.powi(exponent))
        .min(config.max_wait_secs)
        .max(0.0);

    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| config.max_wait())
}

/// Retry executor holding one [`RetryConfig`] per config key.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    configs: BTreeMap<String, RetryConfig>,
    fallback: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl RetryPolicy {
    /// Creates a policy from a keyed table. The `default` entry, when
    /// present, serves keys that have no entry of their own.
    pub fn new(configs: BTreeMap<String, RetryConfig>) -> Self {
        let fallback = configs.get(DEFAULT_RETRY_KEY).cloned().unwrap_or_default();
        Self { configs, fallback }
    }

    /// Creates a policy from the application's retry table.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.retry.clone())
    }

    /// Adds or replaces the configuration for one key.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, config: RetryConfig) -> Self {
        let key = key.into();
        if key == DEFAULT_RETRY_KEY {
            self.fallback = config.clone();
        }
        self.configs.insert(key, config);
        self
    }

    /// Returns the configuration used for `key`.
    pub fn config_for(&self, key: &str) -> &RetryConfig {
        self.configs.get(key).unwrap_or(&self.fallback)
    }

    /// Returns the wait applied after a `kind` fault on `attempt` for `key`.
    pub fn wait_for(&self, key: &str, kind: FaultKind, attempt: u32) -> Duration {
        backoff_wait(self.config_for(key), kind, attempt)
    }

    /// Runs `work` until it succeeds, hits a non-retryable fault, or the
    /// attempts for `key` are used up.
    ///
    /// After a success the configured pacing delay is observed before the
    /// value is returned; shutdown shortens that delay but never discards the
    /// value. Shutdown during a backoff wait returns
    /// [`Retryable::interrupted`] immediately.
    pub async fn execute<F, Fut, T, E>(
        &self,
        key: &str,
        shutdown: &CancellationToken,
        mut work: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let config = self.config_for(key);
        let max_attempts = config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match work().await {
                Ok(value) => {
                    if !sleep_or_cancel(config.success_wait(), shutdown).await {
                        debug!(key, "Success pacing cut short by shutdown");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let Some(kind) = err.fault_kind() else {
                        return Err(err);
                    };

                    if !config.is_retryable(kind) {
                        warn!(key, fault_kind = %kind, error = %err, "Non-retryable fault");
                        return Err(err);
                    }

                    if attempt >= max_attempts {
                        warn!(
                            key,
                            attempts = attempt,
                            fault_kind = %kind,
                            error = %err,
                            "Retry attempts exhausted"
                        );
                        return Err(err);
                    }

                    let wait = backoff_wait(config, kind, attempt);
                    warn!(
                        key,
                        attempt,
                        max_attempts,
                        fault_kind = %kind,
                        wait_secs = wait.as_secs_f64(),
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    metrics::counter!(RETRIES_TOTAL, "key" => key.to_string(), "kind" => kind.as_str())
                        .increment(1);

                    if !sleep_or_cancel(wait, shutdown).await {
                        debug!(key, attempt, "Backoff interrupted by shutdown");
                        return Err(E::interrupted());
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::Fault;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn quick_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_wait_secs: 1.0,
            backoff_factor: 2.0,
            max_wait_secs: 10.0,
            success_wait_secs: 0.0,
            ..Default::default()
        }
    }

    fn policy(config: RetryConfig) -> RetryPolicy {
        RetryPolicy::default().with_config("test", config)
    }

    #[test]
    fn test_exponential_waits() {
        let config = quick_config();
        let waits: Vec<u64> = (1..=5)
            .map(|attempt| backoff_wait(&config, FaultKind::Network, attempt).as_secs())
            .collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 10]);
    }

    #[test]
    fn test_override_wait_is_fixed() {
        let config = quick_config().with_initial_wait(FaultKind::RateLimit, Duration::from_secs(2));
        for attempt in 1..=4 {
            assert_eq!(
                backoff_wait(&config, FaultKind::RateLimit, attempt),
                Duration::from_secs(2)
            );
        }
        assert_eq!(backoff_wait(&config, FaultKind::Gateway, 3), Duration::from_secs(4));
    }

    #[test]
    fn test_huge_attempt_is_capped() {
        let config = quick_config();
        assert_eq!(
            backoff_wait(&config, FaultKind::Network, u32::MAX),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_unknown_key_uses_default_entry() {
        let mut table = BTreeMap::new();
        table.insert(
            DEFAULT_RETRY_KEY.to_string(),
            RetryConfig {
                max_retries: 9,
                ..Default::default()
            },
        );
        let policy = RetryPolicy::new(table);
        assert_eq!(policy.config_for("anything").max_retries, 9);
        assert_eq!(RetryPolicy::default().config_for("anything").max_retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let policy = policy(quick_config());
        let token = CancellationToken::new();
        let result: Result<i32, DroverError> = policy.execute("test", &token, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_between_attempts() {
        let policy = policy(quick_config());
        let token = CancellationToken::new();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(), DroverError> = policy
            .execute("test", &token, || {
                let stamps = stamps.clone();
                async move {
                    stamps.lock().unwrap().push(Instant::now());
                    Err(DroverError::from(Fault::network("connection reset")))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().fault_kind(), Some(FaultKind::Network));
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        assert_eq!(stamps[1] - stamps[0], Duration::from_secs(1));
        assert_eq!(stamps[2] - stamps[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_override_between_attempts() {
        let config = quick_config().with_initial_wait(FaultKind::RateLimit, Duration::from_secs(2));
        let policy = policy(config);
        let token = CancellationToken::new();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let _: Result<(), DroverError> = policy
            .execute("test", &token, || {
                let stamps = stamps.clone();
                async move {
                    stamps.lock().unwrap().push(Instant::now());
                    Err(DroverError::from(Fault::rate_limit("slow down")))
                }
            })
            .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        assert_eq!(stamps[1] - stamps[0], Duration::from_secs(2));
        assert_eq!(stamps[2] - stamps[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success() {
        let policy = policy(quick_config());
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<u32, DroverError> = policy
            .execute("test", &token, || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(DroverError::from(Fault::gateway("bad gateway")))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_is_not_retried() {
        let policy = policy(quick_config());
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<(), DroverError> = policy
            .execute("test", &token, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DroverError::from(Fault::authentication("bad token")))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().fault_kind(), Some(FaultKind::Authentication));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_error_propagates() {
        let policy = policy(quick_config());
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), DroverError> = policy
            .execute("test", &token, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DroverError::Internal("boom".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(DroverError::Internal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_retries_still_runs_once() {
        let policy = policy(RetryConfig {
            max_retries: 0,
            ..quick_config()
        });
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let _: Result<(), DroverError> = policy
            .execute("test", &token, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DroverError::from(Fault::network("down")))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let policy = policy(RetryConfig {
            base_wait_secs: 300.0,
            max_wait_secs: 900.0,
            ..quick_config()
        });
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let result: Result<(), DroverError> = policy
            .execute("test", &token, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DroverError::from(Fault::network("down")))
                }
            })
            .await;

        assert!(matches!(result, Err(DroverError::Interrupted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_pacing_observed() {
        let policy = policy(RetryConfig {
            success_wait_secs: 10.0,
            ..quick_config()
        });
        let token = CancellationToken::new();
        let start = Instant::now();

        let result: Result<i32, DroverError> = policy.execute("test", &token, || async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_pacing_keeps_result() {
        let policy = policy(RetryConfig {
            success_wait_secs: 60.0,
            ..quick_config()
        });
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<i32, DroverError> = policy.execute("test", &token, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
