use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub const RETRY_AFTER_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-retry-after");

/// Errors surfaced to HTTP callers. Everything past acceptance is
/// asynchronous, so this is the whole synchronous error surface.
#[derive(Debug)]
pub enum ApiError {
    Invalid(String),
    RateLimited { retry_after_secs: u64 },
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Invalid(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "rate limit exceeded" })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER_HEADER, HeaderValue::from(retry_after_secs));
                response
            }
            ApiError::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": message })),
            )
                .into_response(),
        }
    }
}
