use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::LogResult;
use crate::log::{topics, EventLog, PartitionConsumer};
use crate::message::{MessageStatus, StatusUpdate};
use crate::metrics::Metrics;
use crate::notifier::{LiveEvent, LiveNotifier};
use crate::store::MessageStateStore;

/// Fire-and-forget emission of status transitions, keyed by message id
/// so each message's updates stay ordered. Non-critical: publish
/// failures are logged, not retried, and never block delivery.
#[derive(Clone)]
pub struct StatusPublisher {
    log: Arc<dyn EventLog>,
}

impl StatusPublisher {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    pub async fn publish(&self, update: StatusUpdate) {
        let key = update.message_id.to_string();
        let payload = match serde_json::to_vec(&update) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(message_id = %key, error = %e, "status update failed to serialize");
                return;
            }
        };
        if let Err(e) = self.log.publish(topics::STATUS, &key, payload).await {
            warn!(message_id = %key, status = update.new_status.as_str(), error = %e, "status publish failed");
        }
    }
}

/// Consumes the status topic, validates each requested transition
/// against the persisted message state, and forwards applied
/// transitions to the live notifier.
pub struct StatusConsumer;

/// Running status-consumer workers; one per status partition.
pub struct StatusConsumerHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl StatusConsumer {
    pub async fn start(
        log: Arc<dyn EventLog>,
        state: Arc<MessageStateStore>,
        notifier: Arc<LiveNotifier>,
        metrics: Arc<Metrics>,
    ) -> LogResult<StatusConsumerHandle> {
        let consumers = log.subscribe(topics::STATUS, "correio-status").await?;
        let (shutdown_tx, _) = watch::channel(false);

        let workers = consumers
            .into_iter()
            .map(|consumer| {
                let state = Arc::clone(&state);
                let notifier = Arc::clone(&notifier);
                let metrics = Arc::clone(&metrics);
                let shutdown = shutdown_tx.subscribe();
                tokio::spawn(status_worker(consumer, state, notifier, metrics, shutdown))
            })
            .collect();

        info!("status consumer started");
        Ok(StatusConsumerHandle {
            shutdown: shutdown_tx,
            workers,
        })
    }
}

impl StatusConsumerHandle {
    /// Signal the workers and wait for them to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        info!("status consumer stopped");
    }
}

async fn status_worker(
    mut consumer: Box<dyn PartitionConsumer>,
    state: Arc<MessageStateStore>,
    notifier: Arc<LiveNotifier>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let partition = consumer.partition();
    debug!(partition, "status worker started");

    loop {
        let record = tokio::select! {
            _ = shutdown.changed() => break,
            next = consumer.next() => match next {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    error!(partition, error = %e, "status consumer read failed");
                    continue;
                }
            },
        };

        match serde_json::from_slice::<StatusUpdate>(&record.payload) {
            Ok(update) => {
                apply_update(&state, &notifier, &metrics, update).await;
            }
            Err(e) => {
                warn!(partition, offset = record.offset, error = %e, "undecodable status update dropped");
            }
        }

        // Illegal and unknown updates are deliberately dropped, so the
        // offset is committed either way.
        if let Err(e) = consumer.ack(record.offset).await {
            error!(partition, offset = record.offset, error = %e, "status offset ack failed");
        }
    }

    debug!(partition, "status worker stopped");
}

async fn apply_update(
    state: &MessageStateStore,
    notifier: &LiveNotifier,
    metrics: &Metrics,
    update: StatusUpdate,
) {
    let message_id = update.message_id;

    let current = match state.get(&message_id).await {
        Ok(Some(current)) => current,
        Ok(None) => {
            // The originating message may not be visible yet under
            // eventual consistency; tolerated, not retried.
            debug!(%message_id, status = update.new_status.as_str(), "status update for unknown message dropped");
            metrics.record_status_dropped("unknown_message");
            return;
        }
        Err(e) => {
            warn!(%message_id, error = %e, "message state unavailable, dropping status update");
            metrics.record_status_dropped("state_unavailable");
            return;
        }
    };

    if current.status == update.new_status {
        // Redelivered transition; applying it again would be a no-op.
        return;
    }

    if !current.status.can_transition_to(update.new_status) {
        warn!(
            %message_id,
            from = current.status.as_str(),
            to = update.new_status.as_str(),
            "illegal status transition dropped"
        );
        metrics.record_status_dropped("illegal_transition");
        return;
    }

    if let Err(e) = state.set_status(&message_id, update.new_status).await {
        warn!(%message_id, error = %e, "status persist failed, dropping update");
        return;
    }
    metrics.record_status_applied(update.new_status.as_str());
    debug!(
        %message_id,
        from = current.status.as_str(),
        to = update.new_status.as_str(),
        "status transition applied"
    );

    let live = LiveEvent {
        message_id,
        conversation_id: current.conversation_id.clone(),
        status: update.new_status,
        timestamp: update.timestamp,
    };

    // Delivery receipts go to the sender; the inbound terminal goes to
    // the recipients.
    if update.new_status == MessageStatus::Received {
        for recipient in &current.recipient_ids {
            let delivered = notifier.publish(recipient, live.clone()).await;
            metrics.record_live_push(delivered);
        }
    } else {
        let delivered = notifier.publish(&current.sender_id, live).await;
        metrics.record_live_push(delivered);
    }
}
