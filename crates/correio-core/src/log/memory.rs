use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::traits::{EventLog, LogRecord, PartitionConsumer};
use crate::error::LogResult;

/// How long a parked consumer waits before re-checking its partition.
/// A notify wakes it earlier; the timeout only covers missed wakeups.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Partition {
    records: Mutex<Vec<LogRecord>>,
    /// Next uncommitted offset per consumer group.
    committed: Mutex<HashMap<String, u64>>,
    notify: Notify,
}

impl Partition {
    fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            committed: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }
}

struct Topic {
    partitions: Vec<Arc<Partition>>,
}

impl Topic {
    fn new(partition_count: usize) -> Self {
        Self {
            partitions: (0..partition_count)
                .map(|_| Arc::new(Partition::new()))
                .collect(),
        }
    }
}

/// Reference [`EventLog`]: partition-ordered, at-least-once, with manual
/// offset commits per consumer group. Used by tests and the default
/// server wiring; a production deployment substitutes a durable log
/// behind the same trait.
pub struct InMemoryEventLog {
    partition_count: usize,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

impl InMemoryEventLog {
    pub fn new(partition_count: usize) -> Self {
        Self {
            partition_count: partition_count.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = lock(&self.topics);
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(self.partition_count)))
            .clone()
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partition_count
    }

    /// All records of a topic, grouped by partition in offset order.
    /// Inspection helper for tests and operational tooling.
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        let topic = self.topic(topic);
        topic
            .partitions
            .iter()
            .flat_map(|p| lock(&p.records).clone())
            .collect()
    }

    pub fn record_count(&self, topic: &str) -> usize {
        let topic = self.topic(topic);
        topic.partitions.iter().map(|p| lock(&p.records).len()).sum()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> LogResult<()> {
        let topic = self.topic(topic);
        let partition = &topic.partitions[self.partition_for(key)];
        {
            let mut records = lock(&partition.records);
            let offset = records.len() as u64;
            records.push(LogRecord {
                offset,
                key: key.to_string(),
                payload,
            });
        }
        partition.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> LogResult<Vec<Box<dyn PartitionConsumer>>> {
        let topic = self.topic(topic);
        Ok(topic
            .partitions
            .iter()
            .enumerate()
            .map(|(index, partition)| {
                Box::new(MemoryPartitionConsumer {
                    partition: Arc::clone(partition),
                    group: group.to_string(),
                    index,
                }) as Box<dyn PartitionConsumer>
            })
            .collect())
    }
}

struct MemoryPartitionConsumer {
    partition: Arc<Partition>,
    group: String,
    index: usize,
}

impl MemoryPartitionConsumer {
    fn peek(&self) -> Option<LogRecord> {
        let cursor = lock(&self.partition.committed)
            .get(&self.group)
            .copied()
            .unwrap_or(0);
        let records = lock(&self.partition.records);
        records.get(cursor as usize).cloned()
    }
}

#[async_trait]
impl PartitionConsumer for MemoryPartitionConsumer {
    fn partition(&self) -> usize {
        self.index
    }

    async fn next(&mut self) -> LogResult<Option<LogRecord>> {
        loop {
            if let Some(record) = self.peek() {
                return Ok(Some(record));
            }
            // Park until a publish to this partition or the poll interval.
            let _ = tokio::time::timeout(POLL_INTERVAL, self.partition.notify.notified()).await;
        }
    }

    async fn ack(&mut self, offset: u64) -> LogResult<()> {
        let mut committed = lock(&self.partition.committed);
        let cursor = committed.entry(self.group.clone()).or_insert(0);
        if offset + 1 > *cursor {
            *cursor = offset + 1;
        }
        Ok(())
    }
}
