use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::routing;
use super::PipelineContext;
use crate::config::DispatchConfig;
use crate::error::LogResult;
use crate::log::{topics, EventLog, LogRecord, PartitionConsumer};
use crate::message::MessageEvent;

/// Consumes message events from the ordered, partitioned log and drives
/// them through dedup → routing → mark-processed → ack.
pub struct Dispatcher;

/// Running dispatcher workers; one per message partition.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Subscribe to the message topic and spawn one worker per
    /// partition, which is what yields per-conversation ordering: two
    /// workers never see events from the same conversation.
    pub async fn start(
        log: Arc<dyn EventLog>,
        ctx: Arc<PipelineContext>,
        config: &DispatchConfig,
    ) -> LogResult<DispatcherHandle> {
        let consumers = log.subscribe(topics::MESSAGES, "correio-pipeline").await?;
        let (shutdown_tx, _) = watch::channel(false);
        let redeliver_pause = Duration::from_millis(config.redeliver_pause_ms);

        let workers = consumers
            .into_iter()
            .map(|consumer| {
                let ctx = Arc::clone(&ctx);
                let shutdown = shutdown_tx.subscribe();
                tokio::spawn(partition_worker(consumer, ctx, shutdown, redeliver_pause))
            })
            .collect();

        info!("dispatcher started");
        Ok(DispatcherHandle {
            shutdown: shutdown_tx,
            workers,
        })
    }
}

impl DispatcherHandle {
    /// Graceful shutdown: signal the workers and wait for each to finish
    /// its in-flight event.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        info!("dispatcher stopped");
    }
}

async fn partition_worker(
    mut consumer: Box<dyn PartitionConsumer>,
    ctx: Arc<PipelineContext>,
    mut shutdown: watch::Receiver<bool>,
    redeliver_pause: Duration,
) {
    let partition = consumer.partition();
    debug!(partition, "partition worker started");

    loop {
        let record = tokio::select! {
            _ = shutdown.changed() => break,
            next = consumer.next() => match next {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    error!(partition, error = %e, "event log read failed");
                    tokio::time::sleep(redeliver_pause).await;
                    continue;
                }
            },
        };

        match process_record(&ctx, &record).await {
            Ok(()) => {
                if let Err(e) = consumer.ack(record.offset).await {
                    error!(partition, offset = record.offset, error = %e, "offset ack failed");
                }
            }
            Err(e) => {
                // Left un-acked: the log redelivers this record. Routing
                // is idempotent per attempt, so redelivery is safe.
                warn!(
                    partition,
                    offset = record.offset,
                    error = %e,
                    "routing failed, waiting for redelivery"
                );
                tokio::time::sleep(redeliver_pause).await;
            }
        }
    }

    debug!(partition, "partition worker stopped");
}

/// One event through the pipeline. `Ok` acknowledges the offset,
/// including deliberate outcomes like dead-lettering; `Err` means a
/// transient condition the log should redeliver.
async fn process_record(
    ctx: &PipelineContext,
    record: &LogRecord,
) -> Result<(), crate::error::DeliveryError> {
    let event: MessageEvent = match serde_json::from_slice(&record.payload) {
        Ok(event) => event,
        Err(e) => {
            // Undecodable bytes carry no message id to dead-letter under;
            // drop them rather than wedge the partition.
            error!(offset = record.offset, key = %record.key, error = %e, "undecodable message event dropped");
            return Ok(());
        }
    };

    ctx.metrics.record_event_consumed(event.channel.as_str());

    if ctx.dedup.is_duplicate(&event.message_id).await {
        debug!(message_id = %event.message_id, "duplicate event dropped");
        ctx.metrics.record_duplicate_dropped();
        return Ok(());
    }

    routing::route_event(ctx, &event).await?;

    // Mark processed before acknowledging the offset: a crash between
    // the two redelivers the event, and the marker then drops it.
    ctx.dedup.mark_processed(&event.message_id).await;
    Ok(())
}
