//! Error types for tuutta-engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// tuutta-common error
    #[error("Common error: {0}")]
    Common(#[from] tuutta_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(tuutta_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(tuutta_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            // Store and serialization details stay in the logs
            ApiError::Common(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure of an outbound delivery (email, push, webhook)
///
/// Never propagated past the delivery attempt: it becomes the `error` of a
/// notification or webhook delivery record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    /// Channel not configured, or nothing to deliver to
    #[error("{0}")]
    Config(String),

    /// Provider answered with a non-success status
    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// Request never completed (connect, timeout, TLS)
    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Network(format!("timed out: {}", err))
        } else {
            DeliveryError::Network(err.to_string())
        }
    }
}

/// Cut `message` to at most `max_chars` characters
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _)) => message[..byte_index].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_message("short", 500), "short");
        assert_eq!(truncate_message("ääää", 2), "ää");
        assert_eq!(truncate_message(&"x".repeat(600), 500).len(), 500);
    }

    #[test]
    fn test_common_not_found_maps_to_404() {
        let response = ApiError::from(tuutta_common::Error::NotFound("delivery d1".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_database_errors_are_opaque() {
        let response =
            ApiError::from(tuutta_common::Error::Internal("secret detail".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
