use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::store::KvStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Admission verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

struct LocalWindow {
    window_start: Instant,
    count: u64,
}

/// Fixed-window request counters per subject key plus one global window,
/// kept in the shared store so every service instance sees the same
/// counts. The first increment of a window sets its expiry; a request is
/// admitted while the count stays within the limit.
///
/// When the shared store is unreachable the limiter falls back to an
/// in-process approximation of the same windows: fail open relative to
/// availability, not security.
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    config: RateLimitConfig,
    local: Mutex<HashMap<String, LocalWindow>>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self {
            kv,
            config,
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Count this request against the subject's window and the global
    /// window; admitted only when both stay within their limits.
    pub async fn check(&self, subject: &str) -> RateLimitDecision {
        let window = Duration::from_secs(self.config.window_secs);

        let subject_count = self
            .incr(&format!("rate:subject:{subject}"), window)
            .await;
        if subject_count > self.config.per_subject_limit {
            return RateLimitDecision::Limited {
                retry_after_secs: self.config.window_secs,
            };
        }

        let global_count = self.incr("rate:global", window).await;
        if global_count > self.config.global_limit + self.config.burst_allowance {
            return RateLimitDecision::Limited {
                retry_after_secs: self.config.window_secs,
            };
        }

        RateLimitDecision::Allowed
    }

    async fn incr(&self, key: &str, window: Duration) -> u64 {
        match self.kv.incr(key, window).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key, error = %e, "rate limit store unavailable, using local windows");
                self.local_incr(key, window)
            }
        }
    }

    fn local_incr(&self, key: &str, window: Duration) -> u64 {
        let now = Instant::now();
        let mut windows = lock(&self.local);
        let entry = windows.entry(key.to_string()).or_insert(LocalWindow {
            window_start: now,
            count: 0,
        });
        if now.duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count
    }
}
