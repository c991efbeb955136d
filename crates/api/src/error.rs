//! API error types and handling
//!
//! Wire format matches what the receiver routes on: a flat
//! `{"error": "<code>"}` body, plus `retryAfter` for quota backoff.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hookwell_capture::CaptureError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Capture shared secret is not configured")]
    ServerMisconfiguration,

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response()
            }
            ApiError::ServerMisconfiguration => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "server_misconfiguration"})),
            )
                .into_response(),
            ApiError::Capture(err) => {
                let status = capture_status(&err);
                let body = match &err {
                    CaptureError::QuotaExceeded { retry_after_ms } => json!({
                        "error": err.code(),
                        "retryAfter": retry_after_ms,
                    }),
                    _ => json!({"error": err.code()}),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

/// HTTP status for a core error.
pub fn capture_status(err: &CaptureError) -> StatusCode {
    match err {
        CaptureError::NotFound => StatusCode::NOT_FOUND,
        CaptureError::Expired => StatusCode::GONE,
        CaptureError::QuotaExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
        CaptureError::Database(msg) => {
            tracing::error!("Database error: {msg}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        // Everything else in the taxonomy is caller input
        _ => StatusCode::BAD_REQUEST,
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Capture(err.into())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
