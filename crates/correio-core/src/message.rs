use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeliveryError;

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// External platforms a message can be routed to, plus the internal-only
/// value for messages addressed to internal user references.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Whatsapp,
    Telegram,
    Instagram,
    Internal,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Instagram => "instagram",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

/// Delivery lifecycle of a message.
///
/// Progression is forward-only along `Pending → Sent → Delivered → Read`.
/// `Failed` is reachable from any non-terminal state. `Received` is the
/// terminal state for inbound-only messages; it ranks after `Read` so the
/// forward rule admits it from any non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Received,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Received => 4,
            Self::Failed => 5,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Received | Self::Failed)
    }

    /// A transition is legal iff the target is `Failed`, or the current
    /// state is non-terminal and the target ranks strictly higher.
    pub fn can_transition_to(self, target: MessageStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if target == Self::Failed {
            return true;
        }
        target.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
            Self::Received => "RECEIVED",
            Self::Failed => "FAILED",
        }
    }
}

/// Immutable record describing one message to be routed. Created by the
/// upstream acceptance surface and consumed, never mutated, by the
/// pipeline. Status changes are represented by emitting new
/// [`StatusUpdate`] records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// Globally unique; doubles as the idempotency key.
    pub message_id: Uuid,
    /// Ordering/partition key.
    pub conversation_id: String,
    pub sender_id: String,
    /// May hold direct platform identities or opaque internal references.
    #[serde(default)]
    pub recipient_ids: Vec<String>,
    pub channel: ChannelType,
    pub content: String,
    pub content_type: ContentType,
    pub status: MessageStatus,
    /// Epoch milliseconds.
    pub timestamp: u64,
    /// Channel-specific extension data.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl MessageEvent {
    /// Generate a new message ID.
    pub fn new_id() -> Uuid {
        Uuid::new_v4()
    }

    /// Structural checks performed before routing. Failures are
    /// non-retryable and dead-letter the event.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.conversation_id.trim().is_empty() {
            return Err(DeliveryError::Malformed("empty conversation_id".into()));
        }
        if self.sender_id.trim().is_empty() {
            return Err(DeliveryError::Malformed("empty sender_id".into()));
        }
        if self.content.is_empty() {
            return Err(DeliveryError::Malformed("empty content".into()));
        }
        if self.recipient_ids.is_empty() {
            return Err(DeliveryError::Malformed("no recipients".into()));
        }
        if self.recipient_ids.iter().any(|r| r.trim().is_empty()) {
            return Err(DeliveryError::Malformed("blank recipient id".into()));
        }
        Ok(())
    }
}

/// Who emitted a status transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusSource {
    Pipeline,
    Connector,
    Client,
}

/// One status transition for one message, published to the status topic
/// keyed by `message_id`. Consumers treat a replayed transition as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub message_id: Uuid,
    pub new_status: MessageStatus,
    pub timestamp: u64,
    pub source: StatusSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusUpdate {
    /// A transition observed by the pipeline itself.
    pub fn pipeline(message_id: Uuid, new_status: MessageStatus) -> Self {
        Self {
            message_id,
            new_status,
            timestamp: now_ms(),
            source: StatusSource::Pipeline,
            error_message: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

/// A message that exhausted normal processing, published to the
/// dead-letter topic together with its failure metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEvent {
    pub message: MessageEvent,
    pub reason: String,
    pub attempts_made: u32,
    pub failed_at: u64,
}

/// One linked platform identity of an internal user. Owned by the user
/// directory service; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdentity {
    pub platform: ChannelType,
    pub platform_user_id: String,
    pub verified: bool,
}

/// Result returned by a channel adapter for one accepted send.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    #[serde(default)]
    pub external_message_id: Option<String>,
    pub status: MessageStatus,
}

/// The settled result of delivering to one platform identity, with the
/// number of attempts it took. Ephemeral: used for outcome folding and
/// dead-letter reasons, never persisted.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub channel: ChannelType,
    pub target_identity: String,
    pub attempt_number: u32,
    pub outcome: Result<DeliveryOutcome, DeliveryError>,
}
