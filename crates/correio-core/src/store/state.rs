use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::traits::KvStore;
use crate::error::KvResult;
use crate::message::{now_ms, MessageEvent, MessageStatus};

/// Persisted per-message view consulted by the status consumer: the
/// current status plus enough addressing to fan live events out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageState {
    pub status: MessageStatus,
    pub sender_id: String,
    pub conversation_id: String,
    pub recipient_ids: Vec<String>,
    pub updated_at: u64,
}

/// Message state keyed by message id in the shared store.
///
/// Status writes go through a read-modify-write: the status topic is
/// partitioned by message id, so each message has a single writer.
pub struct MessageStateStore {
    kv: Arc<dyn KvStore>,
}

impl MessageStateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(message_id: &Uuid) -> String {
        format!("msg-state:{message_id}")
    }

    /// Record the message on first sight, keeping any state an earlier
    /// delivery of the same event already wrote.
    pub async fn insert(&self, event: &MessageEvent) -> KvResult<()> {
        let state = MessageState {
            status: event.status,
            sender_id: event.sender_id.clone(),
            conversation_id: event.conversation_id.clone(),
            recipient_ids: event.recipient_ids.clone(),
            updated_at: now_ms(),
        };
        let value = serde_json::to_vec(&state)?;
        self.kv
            .put_if_absent(&Self::key(&event.message_id), value, None)
            .await?;
        Ok(())
    }

    pub async fn get(&self, message_id: &Uuid) -> KvResult<Option<MessageState>> {
        match self.kv.get(&Self::key(message_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_status(&self, message_id: &Uuid, status: MessageStatus) -> KvResult<()> {
        let Some(mut state) = self.get(message_id).await? else {
            return Ok(());
        };
        state.status = status;
        state.updated_at = now_ms();
        let value = serde_json::to_vec(&state)?;
        self.kv.put(&Self::key(message_id), value, None).await
    }
}
