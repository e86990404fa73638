//! Retry policy for outbound requests.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::client::FetchError;

/// Exponential backoff with jitter.
///
/// Attempt `n` (1-based) that fails transiently waits
/// `base_delay * multiplier^(n-1)` plus up to `jitter`, capped at `max_delay`.
/// A server-supplied `Retry-After` acts as a lower bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: u32,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Maximum random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy used for enrichment targets: fewer attempts, same curve.
    #[must_use]
    pub fn enrichment() -> Self {
        Self {
            max_attempts: 3,
            ..Self::default()
        }
    }

    /// Disable jitter (deterministic delays).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = Duration::ZERO;
        self
    }

    /// Deterministic backoff for the given failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retrying after `attempt` failed.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut delay = self.backoff(attempt);
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }
        delay = delay.saturating_add(self.random_jitter());
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    pub async fn run<T, F, Fut>(&self, target: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.allows_retry(attempt) => {
                    let delay = self.delay_for(attempt, e.retry_after());
                    tracing::warn!(
                        target_url = target,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(
                            target_url = target,
                            attempt,
                            error = %e,
                            "Retry budget exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> FetchError {
        FetchError::Status {
            status: 503,
            url: "https://x.com".to_string(),
        }
    }

    #[test]
    fn test_backoff_curve() {
        let policy = RetryPolicy::default().without_jitter();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(40), policy.max_delay);
    }

    #[test]
    fn test_retry_after_is_lower_bound() {
        let policy = RetryPolicy::default().without_jitter();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(600))),
            policy.max_delay
        );
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.delay_for(1, None);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_then_succeeds() {
        let policy = RetryPolicy::default().without_jitter();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result = policy
            .run("https://x.com", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff on the paused clock.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_budget() {
        let policy = RetryPolicy::default().without_jitter();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = policy
            .run("https://x.com", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_does_not_retry_permanent() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = policy
            .run("https://x.com", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Unauthorized {
                    status: 401,
                    url: "https://x.com".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(FetchError::Unauthorized { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
