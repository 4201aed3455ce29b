use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvResult;

/// Shared low-latency key-value store with per-key expiry.
///
/// Multiple workers and multiple service instances mutate this state
/// concurrently, so every mutation is atomic; there is deliberately no
/// read-then-write surface here. The concrete product is unspecified;
/// [`super::InMemoryKvStore`] is the reference implementation.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()>;

    /// Atomic put-if-absent. Returns true when the key was created.
    async fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> KvResult<bool>;

    /// Atomic increment. The expiry is set only when the counter is
    /// created, which gives fixed-window semantics to callers.
    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<u64>;

    async fn remove(&self, key: &str) -> KvResult<()>;
}
