mod http;
mod mock;
mod registry;

pub use http::HttpChannelAdapter;
pub use mock::{MockChannelAdapter, MockOutcome};
pub use registry::AdapterRegistry;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::message::{DeliveryOutcome, MessageEvent};

/// Result of a credential check against a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

/// Uniform interface over one external channel.
///
/// Implementations own their channel-specific transformation and
/// webhook signature validation; the pipeline only sees this surface.
/// Repeated sends with the same message id must be idempotent.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Deliver `event` to one platform identity.
    async fn send(
        &self,
        event: &MessageEvent,
        target: &str,
    ) -> Result<DeliveryOutcome, DeliveryError>;

    async fn validate_credentials(&self) -> Result<ValidationResult, DeliveryError>;

    fn channel_name(&self) -> &'static str;
}
