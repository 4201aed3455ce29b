mod dispatcher;
mod routing;

pub use dispatcher::{Dispatcher, DispatcherHandle};

use std::sync::Arc;

use crate::adapter::AdapterRegistry;
use crate::dedup::DedupStore;
use crate::dlq::DeadLetterHandler;
use crate::identity::IdentityResolver;
use crate::metrics::Metrics;
use crate::retry::RetryExecutor;
use crate::status::StatusPublisher;
use crate::store::MessageStateStore;

/// Shared collaborators of the routing pipeline, assembled once during
/// wiring and handed to every partition worker.
pub struct PipelineContext {
    pub dedup: DedupStore,
    pub resolver: Arc<dyn IdentityResolver>,
    pub adapters: AdapterRegistry,
    pub retry: RetryExecutor,
    pub dlq: DeadLetterHandler,
    pub status: StatusPublisher,
    pub state: Arc<MessageStateStore>,
    pub metrics: Arc<Metrics>,
}

#[cfg(test)]
mod tests;
