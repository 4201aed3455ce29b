use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::message::MessageStatus;

/// Event pushed to connected clients: a status or content transition for
/// one message.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub message_id: Uuid,
    pub conversation_id: String,
    pub status: MessageStatus,
    pub timestamp: u64,
}

/// Handle for one connected session; required to deregister.
#[derive(Debug)]
pub struct SessionToken {
    user_id: String,
    session: u64,
}

#[derive(Default)]
struct UserStream {
    sessions: HashMap<u64, UnboundedSender<LiveEvent>>,
}

/// Registry of currently-connected recipients.
///
/// One logical stream per user; concurrent sessions attach to it and the
/// entry is torn down when the last session deregisters. Publishing to an
/// absent user is a no-op; missed events are recovered later through the
/// persisted message state, not here. Senders are unbounded, so a slow
/// consumer can never back-pressure the pipeline.
#[derive(Default)]
pub struct LiveNotifier {
    streams: RwLock<HashMap<String, UserStream>>,
    next_session: AtomicU64,
}

impl LiveNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session to the user's stream, creating it if needed.
    pub async fn register(&self, user_id: &str) -> (SessionToken, UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);

        let mut streams = self.streams.write().await;
        streams
            .entry(user_id.to_string())
            .or_default()
            .sessions
            .insert(session, tx);
        debug!(user_id, session, "live session registered");

        (
            SessionToken {
                user_id: user_id.to_string(),
                session,
            },
            rx,
        )
    }

    /// Detach a session; the user's stream is removed with its last session.
    pub async fn deregister(&self, token: &SessionToken) {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(&token.user_id) {
            stream.sessions.remove(&token.session);
            if stream.sessions.is_empty() {
                streams.remove(&token.user_id);
            }
        }
        debug!(user_id = %token.user_id, session = token.session, "live session deregistered");
    }

    /// Best-effort push to every session of `user_id`. Returns true when
    /// at least one session received the event.
    pub async fn publish(&self, user_id: &str, event: LiveEvent) -> bool {
        let streams = self.streams.read().await;
        let Some(stream) = streams.get(user_id) else {
            return false;
        };
        let mut delivered = false;
        for tx in stream.sessions.values() {
            // A closed receiver is a session mid-teardown; deregister
            // will prune it.
            if tx.send(event.clone()).is_ok() {
                delivered = true;
            }
        }
        delivered
    }

    pub async fn connected_users(&self) -> usize {
        self.streams.read().await.len()
    }
}
