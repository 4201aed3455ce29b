use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ResolverConfig;
use crate::error::{ResolveError, SetupError};
use crate::message::ExternalIdentity;

/// How a recipient id should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientKind {
    /// Opaque internal user reference; must be resolved to linked
    /// platform identities first.
    InternalUser(Uuid),
    /// Anything that is not a UUID is delivered as-is. Preserves
    /// backward compatibility with direct-addressing callers.
    Direct(String),
}

pub fn classify_recipient(recipient_id: &str) -> RecipientKind {
    match Uuid::parse_str(recipient_id) {
        Ok(user_id) => RecipientKind::InternalUser(user_id),
        Err(_) => RecipientKind::Direct(recipient_id.to_string()),
    }
}

/// Maps an internal user reference to its linked platform identities.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, user_id: &Uuid) -> Result<Vec<ExternalIdentity>, ResolveError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    id: Uuid,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    external_identities: Vec<ExternalIdentity>,
}

/// Client for the user directory service.
///
/// `GET {base}/users/{id}` with a bounded timeout and a small retry on
/// transport errors and 5xx. A 404 is a final answer, never retried.
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    base_url: String,
    attempts: u32,
    retry_pause: Duration,
}

impl HttpIdentityResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, SetupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            attempts: config.attempts.max(1),
            retry_pause: Duration::from_millis(config.retry_pause_ms),
        })
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, user_id: &Uuid) -> Result<Vec<ExternalIdentity>, ResolveError> {
        let url = format!("{}/users/{user_id}", self.base_url);
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match self.client.get(&url).send().await {
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(ResolveError::NotFound(user_id.to_string()));
                }
                Ok(response) if response.status().is_success() => {
                    let user: UserRecord = response
                        .json()
                        .await
                        .map_err(|e| ResolveError::Unavailable(e.to_string()))?;
                    debug!(
                        resolved_id = %user.id,
                        display_name = %user.display_name,
                        identities = user.external_identities.len(),
                        "resolved user"
                    );
                    return Ok(user.external_identities);
                }
                Ok(response) => {
                    last_error = format!("directory returned {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            if attempt < self.attempts {
                warn!(%user_id, attempt, error = %last_error, "resolver attempt failed, retrying");
                tokio::time::sleep(self.retry_pause).await;
            }
        }

        Err(ResolveError::Unavailable(last_error))
    }
}
