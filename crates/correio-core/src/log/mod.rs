mod memory;
mod traits;

pub use memory::InMemoryEventLog;
pub use traits::{EventLog, LogRecord, PartitionConsumer};

/// Topic names used by the pipeline.
pub mod topics {
    /// Inbound message events, keyed by conversation id.
    pub const MESSAGES: &str = "correio.messages";
    /// Status transitions, keyed by message id.
    pub const STATUS: &str = "correio.status";
    /// Messages that exhausted normal processing.
    pub const DEAD_LETTER: &str = "correio.dead-letter";
}
