//! Retry with exponential backoff.
//!
//! Only transient provider errors are retried. The error from the last
//! attempt is returned once retries run out. A rate limit that names a
//! `retry-after` delay stretches the next wait to that delay, capped at the
//! policy's `max_delay`.

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::providers::ProviderError;

/// How many times, and how far apart, to retry a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: usize,
    min_delay: Duration,
    max_delay: Duration,
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,

    /// Attempts made, including the first
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay.max(min_delay);
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
    }

    /// Run `op`, retrying transient errors.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = AtomicUsize::new(1);
        let max_delay = self.max_delay;

        let result = op
            .retry(self.backoff())
            .when(|e: &ProviderError| e.is_transient())
            .adjust(move |e: &ProviderError, delay: Option<Duration>| {
                delay.map(|delay| honor_retry_after(e, delay, max_delay))
            })
            .notify(|e: &ProviderError, delay: Duration| {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    slot = label,
                    attempt,
                    delay = ?delay,
                    error = %e,
                    "Transient provider error, retrying"
                );
            })
            .await;

        RetryOutcome {
            result,
            attempts: attempts.load(Ordering::Relaxed),
        }
    }
}

fn honor_retry_after(error: &ProviderError, delay: Duration, max_delay: Duration) -> Duration {
    match error {
        ProviderError::RateLimited {
            retry_after: Some(after),
        } => (*after).min(max_delay).max(delay),
        _ => delay,
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_delays(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let outcome = fast(2)
            .run("evaluator_a", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::HttpError("connection reset".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let outcome: RetryOutcome<()> = fast(2)
            .run("evaluator_b", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::ApiError {
                        status: 503,
                        message: "overloaded".into(),
                    })
                }
            })
            .await;

        assert!(matches!(outcome.result, Err(ProviderError::ApiError { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let outcome: RetryOutcome<()> = fast(5)
            .run("curator", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::AuthError)
                }
            })
            .await;

        assert!(matches!(outcome.result, Err(ProviderError::AuthError)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_max_delay_never_below_min() {
        let policy = RetryPolicy::new(1)
            .with_delays(Duration::from_secs(3), Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_retry_after_is_capped_by_max_delay() {
        let limited = |secs| ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
        };
        let backoff = Duration::from_millis(250);
        let cap = Duration::from_secs(2);

        assert_eq!(honor_retry_after(&limited(1), backoff, cap), Duration::from_secs(1));
        assert_eq!(honor_retry_after(&limited(30), backoff, cap), cap);
        assert_eq!(
            honor_retry_after(&ProviderError::RateLimited { retry_after: None }, backoff, cap),
            backoff
        );
        assert_eq!(
            honor_retry_after(&ProviderError::Timeout(Duration::from_secs(5)), backoff, cap),
            backoff
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let start = tokio::time::Instant::now();

        let outcome = RetryPolicy::new(1)
            .with_delays(Duration::from_millis(10), Duration::from_secs(5))
            .run("evaluator_a", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ProviderError::RateLimited {
                            retry_after: Some(Duration::from_secs(3)),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 2);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
