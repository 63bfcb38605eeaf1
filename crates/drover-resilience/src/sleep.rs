//! Shutdown-aware sleeping.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for `duration` unless `shutdown` fires first.
///
/// Returns `true` when the full duration elapsed and `false` when the sleep
/// was cut short.
pub async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !shutdown.is_cancelled();
    }

    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();
        assert!(sleep_or_cancel(Duration::from_secs(30), &token).await);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(!sleep_or_cancel(Duration::from_secs(600), &token).await);
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_zero_duration_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::ZERO, &token).await);
        token.cancel();
        assert!(!sleep_or_cancel(Duration::ZERO, &token).await);
    }
}
