use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::store::KvStore;

/// Idempotency bookkeeping over the shared store.
///
/// Presence of a marker means the message was already processed (or is in
/// flight) by this consumer group; absence means not yet. Markers expire
/// after the configured TTL, which must exceed the longest expected
/// event-log redelivery window.
///
/// Fails open: a store error is logged and treated as not-duplicate,
/// trading a small risk of duplicate delivery for availability. Channel
/// adapters tolerate this by keying sends on the message id.
pub struct DedupStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl DedupStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(message_id: &Uuid) -> String {
        format!("dedup:{message_id}")
    }

    pub async fn is_duplicate(&self, message_id: &Uuid) -> bool {
        match self.kv.get(&Self::key(message_id)).await {
            Ok(marker) => marker.is_some(),
            Err(e) => {
                warn!(%message_id, error = %e, "dedup store unavailable, failing open");
                false
            }
        }
    }

    pub async fn mark_processed(&self, message_id: &Uuid) {
        if let Err(e) = self
            .kv
            .put_if_absent(&Self::key(message_id), vec![1], Some(self.ttl))
            .await
        {
            warn!(%message_id, error = %e, "dedup marker write failed, failing open");
        }
    }
}
