use std::time::Duration;

/// Shared key-value store errors. Store operations can only fail with
/// infrastructure errors, never domain errors. Callers that are allowed
/// to fail open (dedup, rate limiting) do so on this type.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        KvError::Serialization(err.to_string())
    }
}

/// Event-log errors (publish/subscribe/ack).
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("event log unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LogError {
    fn from(err: serde_json::Error) -> Self {
        LogError::Serialization(err.to_string())
    }
}

/// Failures raised while delivering one message to one target.
///
/// `Timeout` and `Unavailable` are transient and eligible for retry;
/// everything else aborts the attempt chain immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("no linked identity for recipient {0}")]
    NoLinkedIdentity(String),

    #[error("channel rejected message: {0}")]
    Rejected(String),

    #[error("delivery timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Identity resolution failures. `NotFound` is a terminal answer from the
/// directory; `Unavailable` means the directory itself could not be
/// reached and the event should be reprocessed later.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("resolver unavailable: {0}")]
    Unavailable(String),
}

/// Final verdict of a retry-wrapped operation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// A non-retryable failure aborted the chain without consuming the
    /// remaining budget.
    #[error("non-retryable failure after {attempts} attempt(s): {source}")]
    Aborted { source: DeliveryError, attempts: u32 },

    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted { source: DeliveryError, attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Aborted { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn source(&self) -> &DeliveryError {
        match self {
            Self::Aborted { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }
}

/// Errors raised while wiring pipeline components.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("http client init failed: {0}")]
    HttpClient(String),
}

impl From<reqwest::Error> for SetupError {
    fn from(err: reqwest::Error) -> Self {
        SetupError::HttpClient(err.to_string())
    }
}

pub type KvResult<T> = std::result::Result<T, KvError>;
pub type LogResult<T> = std::result::Result<T, LogError>;
