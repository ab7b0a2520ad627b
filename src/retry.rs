//! A single retry-with-backoff primitive shared by the LLM and store clients.
//!
//! Retryability is a property of the error, not of the call site: the caller
//! supplies a classifier and every site gets the same exponential backoff,
//! attempt accounting, and cancellation behaviour.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a failed attempt should be treated by [`retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Transient: retry until the policy's attempt budget is exhausted.
    Retryable,
    /// Suspicious but worth one more try (e.g. HTTP 4xx from the model
    /// endpoint, which occasionally clears on resubmission).
    RetryOnce,
    /// Permanent: surface immediately.
    Fatal,
}

/// Attempt budget and backoff shape for [`retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Sleep before the first retry; doubles each attempt.
    pub retry_interval: Duration,
    /// Upper bound on any single backoff sleep.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(2),
            max_backoff: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based), doubling from
    /// `retry_interval` and saturating at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.retry_interval
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Run `op` until it succeeds, the attempt budget runs out, or `cancel`
/// fires.
///
/// `classify` decides per error whether another attempt is allowed. The
/// backoff sleep races against the cancellation token; when the token fires
/// mid-sleep the most recent error is returned so the caller's own
/// cancellation check decides how to surface it.
pub async fn retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    classify: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Retryability,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let allowed = match classify(&err) {
                    Retryability::Retryable => policy.max_retries,
                    Retryability::RetryOnce => 1,
                    Retryability::Fatal => 0,
                };
                if attempt >= allowed || cancel.is_cancelled() {
                    return Err(err);
                }
                let pause = policy.backoff(attempt);
                debug!(attempt, backoff_ms = pause.as_millis() as u64, error = %err, "retrying after failure");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(err),
                    _ = tokio::time::sleep(pause) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_interval: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let policy = RetryPolicy {
            max_retries: 5,
            retry_interval: Duration::from_secs(2),
            max_backoff: Duration::from_secs(15),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(3), Duration::from_secs(15));
        assert_eq!(policy.backoff(30), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn retryable_errors_use_the_full_budget() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), String> = retry(
            &fast_policy(),
            &cancel,
            |_| Retryability::Retryable,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        // Initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn retry_once_errors_get_exactly_one_retry() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), String> = retry(
            &fast_policy(),
            &cancel,
            |_| Retryability::RetryOnce,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("bad request".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), String> = retry(
            &fast_policy(),
            &cancel,
            |_| Retryability::Fatal,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("invalid input".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_failures_returns_the_value() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<u32, String> = retry(
            &fast_policy(),
            &cancel,
            |_| Retryability::Retryable,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("flaky".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(
            &fast_policy(),
            &cancel,
            |_| Retryability::Retryable,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
