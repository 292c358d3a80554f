use crate::error::{KgError, KgResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const BACKOFF_MULTIPLIER: f64 = 1.5;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(15);

/// Exponential backoff parameters applied at every remote call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// A single attempt, no sleeping.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay that follows `current` in the backoff sequence.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(BACKOFF_MULTIPLIER).min(self.max_delay)
    }

    /// Upper bound of the total time spent sleeping when every attempt fails.
    pub fn max_total_delay(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut delay = self.initial_delay;
        for _ in 1..self.max_attempts.max(1) {
            total += delay;
            delay = self.next_delay(delay);
        }
        total
    }

    pub async fn run<T, F, Fut>(&self, op: F) -> KgResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = KgResult<T>>,
    {
        retry_with_backoff(self.max_attempts, self.initial_delay, self.max_delay, op).await
    }
}

/// Calls `op` up to `max_attempts` times.
///
/// A non-retryable error is returned as-is after the attempt that produced it.
/// Retryable errors sleep `delay` (growing by 1.5x, capped at `max_delay`)
/// before the next attempt; running out of attempts yields
/// [`KgError::RetriesExhausted`] wrapping the last error.
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    mut op: F,
) -> KgResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = KgResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = initial_delay.min(max_delay);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                return Err(KgError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retryable failure: {}",
                    err
                );
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(BACKOFF_MULTIPLIER).min(max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: KgResult<()> = retry_with_backoff(
            5,
            Duration::from_millis(10),
            Duration::from_millis(100),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(KgError::graph("generic relationship label"))
                }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(KgError::Graph { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_exhausts_all_attempts_within_backoff_bound() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::from_millis(200));

        let started = tokio::time::Instant::now();
        let result: KgResult<()> = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(KgError::database("connection reset"))
                }
            })
            .await;
        let elapsed = started.elapsed();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(KgError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, KgError::Database { .. }));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }

        // 100 + 150 + 200 (capped)
        assert_eq!(policy.max_total_delay(), Duration::from_millis(450));
        assert!(elapsed >= Duration::from_millis(450));
        assert!(elapsed <= policy.max_total_delay() + Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value = retry_with_backoff(
            3,
            Duration::from_millis(10),
            Duration::from_millis(10),
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(KgError::generative_text("503"))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
    }

    #[test]
    fn next_delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(policy.next_delay(Duration::from_secs(3)), Duration::from_secs(4));
        assert_eq!(policy.next_delay(Duration::from_secs(4)), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn zero_attempts_is_treated_as_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: KgResult<()> =
            retry_with_backoff(0, Duration::ZERO, Duration::ZERO, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(KgError::database("down"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(KgError::RetriesExhausted { attempts: 1, .. })
        ));
    }
}
