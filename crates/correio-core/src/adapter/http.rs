use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelAdapter, ValidationResult};
use crate::config::AdapterConfig;
use crate::error::{DeliveryError, SetupError};
use crate::message::{ChannelType, DeliveryOutcome, MessageEvent};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    message_id: Uuid,
    recipient: &'a str,
    content: &'a str,
    conversation_id: &'a str,
    sender_id: &'a str,
}

/// Client for one connector service speaking the uniform adapter
/// contract: `POST {base}/v1/messages` answering `202 Accepted`.
/// Connectors key on `messageId`, so repeated sends are idempotent.
pub struct HttpChannelAdapter {
    channel: ChannelType,
    client: reqwest::Client,
    base_url: String,
    send_timeout: Duration,
}

impl HttpChannelAdapter {
    pub fn new(
        channel: ChannelType,
        base_url: &str,
        config: &AdapterConfig,
    ) -> Result<Self, SetupError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            channel,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        })
    }

    fn classify(&self, error: reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::Timeout(self.send_timeout)
        } else {
            DeliveryError::Unavailable(error.to_string())
        }
    }
}

#[async_trait]
impl ChannelAdapter for HttpChannelAdapter {
    async fn send(
        &self,
        event: &MessageEvent,
        target: &str,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let request = SendRequest {
            message_id: event.message_id,
            recipient: target,
            content: &event.content,
            conversation_id: &event.conversation_id,
            sender_id: &event.sender_id,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .timeout(self.send_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DeliveryError::Unavailable(format!(
                "connector returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected(format!(
                "connector returned {status}: {body}"
            )));
        }

        let outcome: DeliveryOutcome = response
            .json()
            .await
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        debug!(
            channel = self.channel.as_str(),
            message_id = %event.message_id,
            external_id = outcome.external_message_id.as_deref().unwrap_or("-"),
            "connector accepted message"
        );
        Ok(outcome)
    }

    async fn validate_credentials(&self) -> Result<ValidationResult, DeliveryError> {
        let response = self
            .client
            .get(format!("{}/v1/credentials", self.base_url))
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(ValidationResult::Valid)
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Ok(ValidationResult::Invalid(format!(
                "connector rejected credentials with {status}"
            )))
        } else {
            Err(DeliveryError::Unavailable(format!(
                "credential check returned {status}"
            )))
        }
    }

    fn channel_name(&self) -> &'static str {
        self.channel.as_str()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::message::{ContentType, MessageStatus};

    fn event() -> MessageEvent {
        MessageEvent {
            message_id: MessageEvent::new_id(),
            conversation_id: "conv-9".to_string(),
            sender_id: "alice".to_string(),
            recipient_ids: vec!["+551199".to_string()],
            channel: ChannelType::Whatsapp,
            content: "hello".to_string(),
            content_type: ContentType::Text,
            status: MessageStatus::Pending,
            timestamp: 1,
            metadata: HashMap::new(),
        }
    }

    fn adapter_for(server: &MockServer) -> HttpChannelAdapter {
        HttpChannelAdapter::new(
            ChannelType::Whatsapp,
            &server.base_url(),
            &AdapterConfig {
                send_timeout_ms: 2_000,
                endpoints: HashMap::new(),
                mock_receipt_delay_ms: 0,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepted_send_returns_the_outcome() {
        let server = MockServer::start_async().await;
        let event = event();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/messages")
                    .json_body_includes(format!(
                        r#"{{"messageId": "{}", "recipient": "+551199"}}"#,
                        event.message_id
                    ));
                then.status(202).json_body(json!({
                    "messageId": event.message_id,
                    "externalMessageId": "wamid.123",
                    "status": "SENT",
                    "timestamp": 1700000000000u64
                }));
            })
            .await;

        let adapter = adapter_for(&server);
        let outcome = adapter.send(&event, "+551199").await.unwrap();
        assert_eq!(outcome.external_message_id.as_deref(), Some("wamid.123"));
        assert_eq!(outcome.status, MessageStatus::Sent);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_map_to_retryable_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/messages");
                then.status(503);
            })
            .await;

        let error = adapter_for(&server).send(&event(), "+551199").await.unwrap_err();
        assert!(error.is_retryable(), "5xx should be retryable: {error}");
    }

    #[tokio::test]
    async fn client_errors_map_to_non_retryable_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/messages");
                then.status(422).body("unknown recipient");
            })
            .await;

        let error = adapter_for(&server).send(&event(), "+551199").await.unwrap_err();
        assert!(!error.is_retryable());
        assert!(matches!(error, DeliveryError::Rejected(_)));
    }

    #[tokio::test]
    async fn credential_check_distinguishes_invalid_from_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/credentials");
                then.status(401);
            })
            .await;

        let result = adapter_for(&server).validate_credentials().await.unwrap();
        assert!(matches!(result, ValidationResult::Invalid(_)));
    }
}
