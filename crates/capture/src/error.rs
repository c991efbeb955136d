//! Typed errors for the ingestion-and-accounting core
//!
//! Every mutation and query in this crate returns these as values; only
//! storage failures surface as `Database`. Callers route on the wire code:
//! `not_found` is never retried, `expired` is terminal, `quota_exceeded`
//! carries a retry-after hint, and validation codes are caller bugs.

use thiserror::Error;

/// Core error taxonomy
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Endpoint or user not found")]
    NotFound,

    #[error("Endpoint expired")]
    Expired,

    #[error("Quota exceeded, retry after {retry_after_ms}ms")]
    QuotaExceeded { retry_after_ms: i64 },

    #[error("Method not allowed for capture")]
    InvalidMethod,

    #[error("Invalid slug")]
    InvalidSlug,

    #[error("Invalid path")]
    InvalidPath,

    #[error("Invalid client ip")]
    InvalidIp,

    #[error("Too many or oversized headers")]
    InvalidHeaders,

    #[error("Too many query parameters")]
    InvalidQueryParams,

    #[error("Request timestamp outside freshness window")]
    InvalidTimestamp,

    #[error("Body too large")]
    BodyTooLarge,

    #[error("Batch exceeds maximum size")]
    BatchTooLarge,

    #[error("Database error: {0}")]
    Database(String),
}

impl CaptureError {
    /// Stable wire code for the receiver boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InvalidMethod => "invalid_method",
            Self::InvalidSlug => "invalid_slug",
            Self::InvalidPath => "invalid_path",
            Self::InvalidIp => "invalid_ip",
            Self::InvalidHeaders => "invalid_headers",
            Self::InvalidQueryParams => "invalid_query_params",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::BodyTooLarge => "body_too_large",
            Self::BatchTooLarge => "batch_too_large",
            Self::Database(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for CaptureError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CaptureError::NotFound,
            _ => CaptureError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::Database(format!("payload encoding: {}", err))
    }
}

/// Result type alias for core operations
pub type CaptureResult<T> = Result<T, CaptureError>;
