//! Cancellable retry with exponential backoff.

use crate::error::Cancelled;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Backoff bounds for [`until_succeeds`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay after the first failure, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay, in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Delay after the first failure.
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Upper bound on the delay between attempts.
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Run `attempt` until it returns `Ok`, doubling the delay after each failure.
///
/// Every failure is logged. Cancellation is observed both while an attempt is
/// in flight and while sleeping; the in-flight attempt is dropped and
/// `Cancelled` returned.
pub async fn until_succeeds<T, E, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, Cancelled>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut backoff = config.initial_backoff();
    let mut attempts: u64 = 0;
    loop {
        let err = match cancellable(cancel, operation, attempt()).await? {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempts += 1;
        warn!(
            target: "challenge_watcher",
            operation,
            attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Operation failed, retrying"
        );

        cancellable(cancel, operation, tokio::time::sleep(backoff)).await?;
        backoff = backoff.saturating_mul(2).min(config.max_backoff());
    }
}

/// Await `future` unless `cancel` fires first, in which case the future is dropped.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: &'static str,
    future: impl Future<Output = T>,
) -> Result<T, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled { operation }),
        output = future => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let value = until_succeeds(&cancel, &fast(), "flaky", || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let succeed = || async { Ok::<_, String>(()) };

        let result = until_succeeds(&cancel, &fast(), "never", succeed).await;
        assert_eq!(result.unwrap_err().operation, "never");
    }

    #[tokio::test]
    async fn test_cancellation_stops_failing_loop() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let trigger = cancel.clone();

        let result: Result<(), _> = until_succeeds(&cancel, &fast(), "always fails", || {
            let counter = Arc::clone(&counter);
            let trigger = trigger.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 4 {
                    trigger.cancel();
                }
                Err::<(), _>("boom")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_cancellable_drops_stalled_future() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let stalled = std::future::pending::<()>();
        let result = cancellable(&cancel, "stalled", stalled).await;
        assert_eq!(result.unwrap_err().operation, "stalled");

        let ready = cancellable(&CancellationToken::new(), "ready", async { 7 }).await;
        assert_eq!(ready, Ok(7));
    }

    #[test]
    fn test_default_backoff() {
        let config = RetryConfig::default();
        assert_eq!(config.initial_backoff(), Duration::from_millis(250));
        assert_eq!(config.max_backoff(), Duration::from_secs(10));
    }
}
