use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelAdapter, ValidationResult};
use crate::error::DeliveryError;
use crate::message::{
    now_ms, ChannelType, DeliveryOutcome, MessageEvent, MessageStatus, StatusSource, StatusUpdate,
};
use crate::status::StatusPublisher;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted outcome for one mock send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Success,
    Timeout,
    Unavailable,
    Rejected,
}

struct DelayedReceipt {
    publisher: StatusPublisher,
    delay: Duration,
    shutdown: watch::Receiver<bool>,
}

/// In-process channel adapter used by tests and the default server
/// wiring when no connector endpoint is configured.
///
/// Outcomes can be scripted per target or queued per call; unscripted
/// sends succeed. Optionally emits a delayed `DELIVERED` receipt the way
/// a real connector webhook would: a scheduled task cancelled on
/// shutdown, never a blocking sleep in a worker.
pub struct MockChannelAdapter {
    channel: ChannelType,
    by_target: Mutex<HashMap<String, MockOutcome>>,
    queued: Mutex<VecDeque<MockOutcome>>,
    sent: Mutex<Vec<(Uuid, String)>>,
    receipt: Option<DelayedReceipt>,
}

impl MockChannelAdapter {
    pub fn new(channel: ChannelType) -> Self {
        Self {
            channel,
            by_target: Mutex::new(HashMap::new()),
            queued: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            receipt: None,
        }
    }

    /// Emit a `DELIVERED` status for every successful send after `delay`.
    pub fn with_delivery_receipt(
        mut self,
        publisher: StatusPublisher,
        delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        self.receipt = Some(DelayedReceipt {
            publisher,
            delay,
            shutdown,
        });
        self
    }

    /// Fix the outcome for every send to `target`.
    pub fn set_outcome_for(&self, target: &str, outcome: MockOutcome) {
        lock(&self.by_target).insert(target.to_string(), outcome);
    }

    /// Queue outcomes consumed one per send, in order, for targets
    /// without a fixed outcome.
    pub fn queue_outcomes(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        lock(&self.queued).extend(outcomes);
    }

    /// Every `(message_id, target)` this adapter was asked to send.
    pub fn sent(&self) -> Vec<(Uuid, String)> {
        lock(&self.sent).clone()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    fn outcome_for(&self, target: &str) -> MockOutcome {
        if let Some(outcome) = lock(&self.by_target).get(target) {
            return *outcome;
        }
        lock(&self.queued)
            .pop_front()
            .unwrap_or(MockOutcome::Success)
    }

    fn schedule_receipt(&self, message_id: Uuid) {
        let Some(receipt) = &self.receipt else {
            return;
        };
        let publisher = receipt.publisher.clone();
        let delay = receipt.delay;
        let mut shutdown = receipt.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    publisher
                        .publish(StatusUpdate {
                            message_id,
                            new_status: MessageStatus::Delivered,
                            timestamp: now_ms(),
                            source: StatusSource::Connector,
                            error_message: None,
                        })
                        .await;
                }
                _ = shutdown.changed() => {
                    debug!(%message_id, "delivery receipt cancelled by shutdown");
                }
            }
        });
    }
}

#[async_trait]
impl ChannelAdapter for MockChannelAdapter {
    async fn send(
        &self,
        event: &MessageEvent,
        target: &str,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        lock(&self.sent).push((event.message_id, target.to_string()));

        match self.outcome_for(target) {
            MockOutcome::Success => {
                self.schedule_receipt(event.message_id);
                Ok(DeliveryOutcome {
                    external_message_id: Some(format!(
                        "{}-{}",
                        self.channel.as_str(),
                        event.message_id
                    )),
                    status: MessageStatus::Sent,
                })
            }
            MockOutcome::Timeout => Err(DeliveryError::Timeout(Duration::from_secs(5))),
            MockOutcome::Unavailable => {
                Err(DeliveryError::Unavailable("connector down".to_string()))
            }
            MockOutcome::Rejected => {
                Err(DeliveryError::Rejected("connector returned 422".to_string()))
            }
        }
    }

    async fn validate_credentials(&self) -> Result<ValidationResult, DeliveryError> {
        Ok(ValidationResult::Valid)
    }

    fn channel_name(&self) -> &'static str {
        self.channel.as_str()
    }
}
