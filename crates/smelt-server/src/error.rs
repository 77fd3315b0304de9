//! Error types for the smelt server.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Smelt core error.
    #[error("Core error: {0}")]
    Core(#[from] smelt_core::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request body over the configured limit or unreadable.
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Host and port do not form a socket address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A background task died.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ServerError {
    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        use smelt_core::Error as Core;

        let (status, error, message) = match self {
            Self::Core(Core::Validation(e)) => {
                (StatusCode::BAD_REQUEST, "validation_error", e.to_string())
            }
            Self::Core(Core::RateLimited { retry_after }) => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!(
                    "Too many compilations, retry in {} seconds",
                    retry_after_secs(*retry_after)
                ),
            ),
            Self::Core(Core::NotFound(_)) => (
                StatusCode::NOT_FOUND,
                "not_found",
                "The compilation ID is invalid or has expired".to_string(),
            ),
            Self::Core(Core::NoArtifacts(_)) => (
                StatusCode::NOT_FOUND,
                "no_artifacts",
                "No plugin of this compilation compiled successfully".to_string(),
            ),
            Self::PayloadTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                self.to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".to_string(),
            ),
        };
        (status, ErrorBody { error, message })
    }
}

/// Whole seconds to wait, rounded up and never zero.
fn retry_after_secs(retry_after: std::time::Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            // Details stay in the log; the body is generic
            tracing::error!("Request failed: {}", self);
        }

        let mut response = (status, Json(body)).into_response();

        if let Self::Core(smelt_core::Error::RateLimited { retry_after }) = &self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs(*retry_after).to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retry_after_rounding() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(89_001)), 90);
        assert_eq!(retry_after_secs(Duration::from_secs(90)), 90);
    }

    #[test]
    fn test_rate_limited_response() {
        let err = ServerError::Core(smelt_core::Error::RateLimited {
            retry_after: Duration::from_millis(1500),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = ServerError::Core(smelt_core::Error::Spawn {
            program: "/opt/secret/amxxpc".to_string(),
            message: "permission denied".to_string(),
        });
        let (status, body) = err.status_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.message.contains("/opt/secret"));
    }

    #[test]
    fn test_not_found_variants() {
        let (status, body) =
            ServerError::Core(smelt_core::Error::NotFound("x".into())).status_and_body();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "not_found");

        let (status, body) =
            ServerError::Core(smelt_core::Error::NoArtifacts("x".into())).status_and_body();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "no_artifacts");
    }
}
