use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, warn};

use crate::log::{topics, EventLog};
use crate::message::{now_ms, DeadLetterEvent, MessageEvent};

/// Routes messages that exhausted normal processing to the dead-letter
/// topic for later operator-triggered reprocessing.
///
/// This path never silently drops: when the failure topic itself is
/// unreachable, the entry is appended synchronously to a local spool
/// file, fsynced, and flagged for manual intervention.
pub struct DeadLetterHandler {
    log: Arc<dyn EventLog>,
    spool_path: PathBuf,
}

impl DeadLetterHandler {
    pub fn new(log: Arc<dyn EventLog>, spool_path: impl Into<PathBuf>) -> Self {
        Self {
            log,
            spool_path: spool_path.into(),
        }
    }

    pub async fn send_to_dlq(&self, message: MessageEvent, reason: &str, attempts_made: u32) {
        let message_id = message.message_id;
        let entry = DeadLetterEvent {
            message,
            reason: reason.to_string(),
            attempts_made,
            failed_at: now_ms(),
        };

        let payload = match serde_json::to_vec(&entry) {
            Ok(payload) => payload,
            Err(e) => {
                // Serialization of our own types failing is a bug; log
                // everything we have so the message is reconstructible.
                error!(%message_id, error = %e, entry = ?entry, "dead-letter entry failed to serialize");
                return;
            }
        };

        warn!(%message_id, reason, attempts_made, "message dead-lettered");

        if let Err(e) = self
            .log
            .publish(topics::DEAD_LETTER, &message_id.to_string(), payload.clone())
            .await
        {
            error!(
                %message_id,
                error = %e,
                spool = %self.spool_path.display(),
                "dead-letter publish failed, spooling locally; manual intervention required"
            );
            if let Err(e) = self.spool(&payload) {
                error!(
                    %message_id,
                    error = %e,
                    payload = %String::from_utf8_lossy(&payload),
                    "dead-letter spool write failed; entry dumped to log as last resort"
                );
            }
        }
    }

    fn spool(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.spool_path)?;
        file.write_all(payload)?;
        file.write_all(b"\n")?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{LogError, LogResult};
    use crate::log::{InMemoryEventLog, PartitionConsumer};
    use crate::message::{ChannelType, ContentType, MessageStatus};

    fn event() -> MessageEvent {
        MessageEvent {
            message_id: MessageEvent::new_id(),
            conversation_id: "conv-1".to_string(),
            sender_id: "alice".to_string(),
            recipient_ids: vec!["bob".to_string()],
            channel: ChannelType::Whatsapp,
            content: "hi".to_string(),
            content_type: ContentType::Text,
            status: MessageStatus::Pending,
            timestamp: 1,
            metadata: HashMap::new(),
        }
    }

    struct DownLog;

    #[async_trait]
    impl EventLog for DownLog {
        async fn publish(&self, _topic: &str, _key: &str, _payload: Vec<u8>) -> LogResult<()> {
            Err(LogError::Unavailable("broker unreachable".to_string()))
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _group: &str,
        ) -> LogResult<Vec<Box<dyn PartitionConsumer>>> {
            Err(LogError::Unavailable("broker unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn dead_letter_carries_failure_metadata() {
        let log = Arc::new(InMemoryEventLog::new(1));
        let dir = tempfile::tempdir().unwrap();
        let handler = DeadLetterHandler::new(log.clone(), dir.path().join("spool"));

        let message = event();
        handler.send_to_dlq(message.clone(), "retries exhausted", 3).await;

        let records = log.records(topics::DEAD_LETTER);
        assert_eq!(records.len(), 1);
        let entry: DeadLetterEvent = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(entry.message, message);
        assert_eq!(entry.reason, "retries exhausted");
        assert_eq!(entry.attempts_made, 3);
        assert!(entry.failed_at > 0);
    }

    #[tokio::test]
    async fn unreachable_topic_falls_back_to_the_spool_file() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("spool");
        let handler = DeadLetterHandler::new(Arc::new(DownLog), &spool);

        let message = event();
        handler.send_to_dlq(message.clone(), "no linked identity", 0).await;
        handler.send_to_dlq(event(), "retries exhausted", 3).await;

        let contents = std::fs::read_to_string(&spool).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: DeadLetterEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry.message.message_id, message.message_id);
        assert_eq!(entry.attempts_made, 0);
    }
}
