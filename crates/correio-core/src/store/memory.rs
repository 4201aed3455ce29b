use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::traits::KvStore;
use crate::error::KvResult;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entry {
    value: Vec<u8>,
    counter: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Reference [`KvStore`]: a process-local map honouring TTLs against the
/// tokio clock, so paused-time tests can advance expiry deterministically.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the entry if its TTL has elapsed, then run `f` on the live map.
    fn with_live_entry<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> R,
    ) -> R {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
        }
        f(&mut entries)
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        Ok(self.with_live_entry(key, |entries| entries.get(key).map(|e| e.value.clone())))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.with_live_entry(key, |entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    counter: 0,
                    expires_at,
                },
            );
        });
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<bool> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        Ok(self.with_live_entry(key, |entries| {
            if entries.contains_key(key) {
                false
            } else {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        counter: 0,
                        expires_at,
                    },
                );
                true
            }
        }))
    }

    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<u64> {
        let expires_at = Instant::now() + ttl;
        Ok(self.with_live_entry(key, |entries| {
            let entry = entries.entry(key.to_string()).or_insert(Entry {
                value: Vec::new(),
                counter: 0,
                expires_at: Some(expires_at),
            });
            entry.counter += 1;
            entry.counter
        }))
    }

    async fn remove(&self, key: &str) -> KvResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Test double that fails every operation while the switch is on.
/// Exercises the fail-open paths of the dedup store and rate limiter.
#[cfg(test)]
pub(crate) struct FaultyKvStore {
    inner: InMemoryKvStore,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FaultyKvStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryKvStore::new(),
            failing: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> KvResult<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            Err(crate::error::KvError::Unavailable(
                "injected fault".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl KvStore for FaultyKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        self.check()?;
        self.inner.put(key, value, ttl).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<bool> {
        self.check()?;
        self.inner.put_if_absent(key, value, ttl).await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<u64> {
        self.check()?;
        self.inner.incr(key, ttl).await
    }

    async fn remove(&self, key: &str) -> KvResult<()> {
        self.check()?;
        self.inner.remove(key).await
    }
}
