use async_trait::async_trait;

use crate::error::LogResult;

/// One record in one partition of a topic.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Position within the partition; dense from 0.
    pub offset: u64,
    /// The partition key the record was published under.
    pub key: String,
    pub payload: Vec<u8>,
}

/// A durable, partition-ordered, at-least-once event log.
///
/// Records sharing a key land in the same partition and are consumed in
/// publish order. The concrete product behind this trait is deliberately
/// unspecified; [`super::InMemoryEventLog`] is the reference
/// implementation used by tests and the default server wiring.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record to the partition derived from `key`.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> LogResult<()>;

    /// Open one consumer per partition for the given consumer group.
    /// Each partition must be consumed by exactly one worker at a time.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> LogResult<Vec<Box<dyn PartitionConsumer>>>;
}

/// Manually-acknowledged consumer over a single partition.
#[async_trait]
pub trait PartitionConsumer: Send {
    /// Partition index within the topic.
    fn partition(&self) -> usize;

    /// Wait for and return the record at the group's committed cursor.
    /// Does not advance the cursor: an un-acked record is returned again
    /// by the next call, which is how redelivery after a processing
    /// failure works.
    async fn next(&mut self) -> LogResult<Option<LogRecord>>;

    /// Commit everything up to and including `offset`.
    async fn ack(&mut self, offset: u64) -> LogResult<()>;
}
