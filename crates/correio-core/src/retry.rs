use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{DeliveryError, RetryError};

/// Bounded exponential backoff policy for delivery attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier.max(1.0),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before attempt `n` (1-based): zero for the first attempt,
    /// then `initial * multiplier^(n-2)` capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 2);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }
}

/// Runs one delivery operation under the retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Invoke `op` until it succeeds, returns a non-retryable error, or
    /// the attempt budget is spent. The successful value is returned with
    /// the number of attempts made so callers can account for them.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                debug!(label, attempt, delay_ms = delay.as_millis() as u64, "retrying");
            }
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "succeeded after retry");
                    }
                    return Ok((value, attempt));
                }
                Err(source) if !source.is_retryable() => {
                    return Err(RetryError::Aborted {
                        source,
                        attempts: attempt,
                    });
                }
                Err(source) if attempt >= self.policy.max_attempts => {
                    warn!(label, attempt, error = %source, "retries exhausted");
                    return Err(RetryError::Exhausted {
                        source,
                        attempts: attempt,
                    });
                }
                Err(source) => {
                    warn!(label, attempt, error = %source, "attempt failed, will retry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn delay_schedule_matches_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(1));
        assert_eq!(policy.delay_before(3), Duration::from_secs(2));
        assert_eq!(policy.delay_before(4), Duration::from_secs(4));
        // Capped at max_delay.
        assert_eq!(policy.delay_before(6), Duration::from_secs(10));
        assert_eq!(policy.delay_before(10), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_up_to_the_budget() {
        let executor = RetryExecutor::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<((), u32), _> = executor
            .execute("test", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(DeliveryError::Unavailable("down".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failures_reports_attempts() {
        let executor = RetryExecutor::default();

        let (value, attempts) = executor
            .execute("test", |attempt| async move {
                if attempt < 3 {
                    Err(DeliveryError::Timeout(Duration::from_secs(5)))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_aborts_immediately() {
        let executor = RetryExecutor::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<((), u32), _> = executor
            .execute("test", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(DeliveryError::Rejected("bad request".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(RetryError::Aborted { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_delay_before_each_attempt_follows_the_schedule() {
        let executor = RetryExecutor::default();
        let start = tokio::time::Instant::now();
        let timings = Arc::new(std::sync::Mutex::new(Vec::new()));

        let recorder = Arc::clone(&timings);
        let _ = executor
            .execute("test", move |_| {
                recorder.lock().unwrap().push(start.elapsed());
                async { Err::<(), _>(DeliveryError::Unavailable("down".into())) }
            })
            .await;

        let timings = timings.lock().unwrap();
        assert_eq!(timings[0], Duration::ZERO);
        assert_eq!(timings[1], Duration::from_secs(1));
        assert_eq!(timings[2], Duration::from_secs(3)); // 1s + 2s cumulative
    }
}
