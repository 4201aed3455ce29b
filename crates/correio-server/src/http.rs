use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use correio_core::log::topics;
use correio_core::{
    now_ms, ChannelType, ContentType, EventLog, LiveNotifier, MessageEvent, MessageStatus,
    RateLimitDecision, RateLimiter, StatusSource, StatusUpdate,
};

use crate::error::ApiError;

/// Shared handler state: the acceptance surface only ever touches the
/// event log, the rate limiter, and the live stream registry.
#[derive(Clone)]
pub struct AppState {
    pub log: Arc<dyn EventLog>,
    pub limiter: Arc<RateLimiter>,
    pub notifier: Arc<LiveNotifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(accept_message))
        .route("/v1/status", post(accept_status))
        .route("/v1/stream/{user_id}", get(stream))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptRequest {
    conversation_id: String,
    sender_id: String,
    #[serde(default)]
    recipient_ids: Vec<String>,
    channel: ChannelType,
    content: String,
    content_type: ContentType,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptResponse {
    message_id: Uuid,
    status: MessageStatus,
}

/// The caller identity the per-subject window counts against.
fn subject(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Message acceptance. Delivery is asynchronous: callers get `202` and
/// observe progress via the live stream or a later status query.
#[instrument(skip_all, fields(conversation_id = %request.conversation_id))]
async fn accept_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AcceptRequest>,
) -> Result<(StatusCode, Json<AcceptResponse>), ApiError> {
    if let RateLimitDecision::Limited { retry_after_secs } =
        state.limiter.check(&subject(&headers)).await
    {
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    let event = MessageEvent {
        message_id: MessageEvent::new_id(),
        conversation_id: request.conversation_id,
        sender_id: request.sender_id,
        recipient_ids: request.recipient_ids,
        channel: request.channel,
        content: request.content,
        content_type: request.content_type,
        status: MessageStatus::Pending,
        timestamp: now_ms(),
        metadata: request.metadata,
    };
    event.validate().map_err(|e| ApiError::Invalid(e.to_string()))?;

    let payload = serde_json::to_vec(&event).map_err(|e| ApiError::Unavailable(e.to_string()))?;
    state
        .log
        .publish(topics::MESSAGES, &event.conversation_id, payload)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    debug!(message_id = %event.message_id, "message accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptResponse {
            message_id: event.message_id,
            status: event.status,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusWebhook {
    message_id: Uuid,
    status: MessageStatus,
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Connector webhook ingestion: publishes the reported transition onto
/// the status topic for the consumer to validate.
#[instrument(skip_all, fields(message_id = %webhook.message_id))]
async fn accept_status(
    State(state): State<AppState>,
    Json(webhook): Json<StatusWebhook>,
) -> Result<StatusCode, ApiError> {
    let update = StatusUpdate {
        message_id: webhook.message_id,
        new_status: webhook.status,
        timestamp: webhook.timestamp.unwrap_or_else(now_ms),
        source: StatusSource::Connector,
        error_message: webhook.error_message,
    };
    let payload = serde_json::to_vec(&update).map_err(|e| ApiError::Unavailable(e.to_string()))?;
    state
        .log
        .publish(topics::STATUS, &update.message_id.to_string(), payload)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

/// Live status stream. Sessions of one user share the user's logical
/// stream; the registry entry is torn down when the last one leaves.
async fn stream(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| forward_live_events(socket, state, user_id))
}

async fn forward_live_events(mut socket: WebSocket, state: AppState, user_id: String) {
    let (token, rx) = state.notifier.register(&user_id).await;
    let mut events = UnboundedReceiverStream::new(rx);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Inbound frames are ignored; the stream is push-only.
                    Some(Ok(message)) if !matches!(message, Message::Close(_)) => {}
                    _ => break,
                }
            }
        }
    }

    state.notifier.deregister(&token).await;
    debug!(user_id, "live stream closed");
}
