//! Common types used across Hookwell

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Time
// =============================================================================

/// Current time in milliseconds since the UNIX epoch.
///
/// All quota-period, expiry, and receipt instants are stored as epoch-ms
/// BIGINT columns so period arithmetic (retry-after, freshness windows) stays
/// integer math.
pub fn now_ms() -> i64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs() as i64)
        .saturating_mul(1000)
        .saturating_add(d.subsec_millis() as i64)
}

// =============================================================================
// Plans
// =============================================================================

/// Subscription plan for quota accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

impl Default for Plan {
    fn default() -> Self {
        Self::Free
    }
}

impl Plan {
    /// Default per-period request limit for this plan.
    ///
    /// Users carry a denormalized `request_limit` column (the billing
    /// translator may set custom limits); these defaults apply at signup and
    /// on downgrade.
    pub fn request_limit(&self) -> i64 {
        match self {
            Self::Free => FREE_REQUEST_LIMIT,
            Self::Pro => PRO_REQUEST_LIMIT,
        }
    }

    /// Quota-period length for this plan in milliseconds.
    /// Free periods are short and started lazily on first traffic; pro
    /// periods follow the billing cycle and are rolled by the reconciler.
    pub fn period_ms(&self) -> i64 {
        match self {
            Self::Free => FREE_PERIOD_MS,
            Self::Pro => BILLING_CYCLE_MS,
        }
    }

    /// Maximum age of stored requests for this plan before reaping.
    pub fn retention_ms(&self) -> i64 {
        match self {
            Self::Free => FREE_RETENTION_MS,
            Self::Pro => PRO_RETENTION_MS,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Pro => write!(f, "pro"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            _ => Err(format!("Invalid plan: {}", s)),
        }
    }
}

// =============================================================================
// Limits & budgets
// =============================================================================

/// Request cap for anonymous ephemeral endpoints.
pub const EPHEMERAL_REQUEST_LIMIT: i64 = 50;

/// Per-period request limit for the free plan.
pub const FREE_REQUEST_LIMIT: i64 = 200;

/// Per-period request limit for the pro plan.
pub const PRO_REQUEST_LIMIT: i64 = 5_000;

/// Free quota periods run 24 hours from first traffic.
pub const FREE_PERIOD_MS: i64 = 24 * 60 * 60 * 1000;

/// Pro quota periods follow a 30-day billing cycle.
pub const BILLING_CYCLE_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Free-plan requests are kept for one period length.
pub const FREE_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

/// Pro-plan requests are kept for a full billing cycle.
pub const PRO_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Sentinel "unlimited" remaining/limit, returned when an owned endpoint's
/// user row is missing. Failing open here is deliberate: blocking traffic
/// for an orphan would turn a data race between account deletion and
/// in-flight captures into an availability incident.
pub const UNLIMITED: i64 = -1;

/// Maximum webhook body size in bytes (100 KiB).
pub const MAX_BODY_BYTES: usize = 100 * 1024;

/// Maximum stored path length in bytes.
pub const MAX_PATH_BYTES: usize = 2048;

/// Maximum stored IP length (fits IPv6 with zone id).
pub const MAX_IP_LEN: usize = 45;

/// Maximum number of captured headers per request.
pub const MAX_HEADER_COUNT: usize = 100;

/// Maximum length for header keys.
pub const MAX_HEADER_KEY_LEN: usize = 256;

/// Maximum length for header values.
pub const MAX_HEADER_VALUE_LEN: usize = 8192;

/// Maximum number of captured query parameters per request.
pub const MAX_QUERY_PARAM_COUNT: usize = 100;

/// Maximum items per capture batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Batch items may be backdated at most this far (receiver buffering).
pub const RECEIVED_AT_PAST_SLACK_MS: i64 = 60_000;

/// Batch items may be ahead of our clock at most this far (skew).
pub const RECEIVED_AT_FUTURE_SLACK_MS: i64 = 5_000;

/// Counter patches are clamped to this many units per task.
pub const MAX_COUNTER_PATCH: i64 = 1000;

// =============================================================================
// Mock responses
// =============================================================================

/// The configured HTTP response served to whoever sent a captured webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockResponse {
    pub status: i32,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: 200,
            body: "OK".to_string(),
            headers: HashMap::new(),
        }
    }
}

/// Response headers that must never be forwarded from mock responses.
const BLOCKED_MOCK_HEADERS: &[&str] = &[
    "set-cookie",
    "strict-transport-security",
    "content-security-policy",
    "x-frame-options",
];

impl MockResponse {
    /// Drop headers that are oversized, blocked, or carry CRLF injection
    /// attempts, and clamp the status into the valid HTTP range.
    pub fn sanitized(mut self) -> Self {
        if !(100..=599).contains(&self.status) {
            self.status = 200;
        }
        self.headers.retain(|key, value| {
            key.len() <= MAX_HEADER_KEY_LEN
                && value.len() <= MAX_HEADER_VALUE_LEN
                && !BLOCKED_MOCK_HEADERS.contains(&key.to_lowercase().as_str())
                && !key.contains('\r')
                && !key.contains('\n')
                && !value.contains('\r')
                && !value.contains('\n')
        });
        self
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// User model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub plan: String,
    pub requests_used: i64,
    pub request_limit: i64,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub subscription_status: Option<String>,
    pub polar_customer_id: Option<String>,
    pub polar_subscription_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Endpoint model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Endpoint {
    pub id: Uuid,
    pub slug: String,
    pub user_id: Option<Uuid>,
    pub is_ephemeral: bool,
    pub expires_at: Option<i64>,
    pub mock_response: Option<serde_json::Value>,
    pub request_count: i64,
    pub created_at: OffsetDateTime,
}

impl Endpoint {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at < now)
    }

    /// Parse the stored mock response, if any. Malformed JSON (e.g. written
    /// by an older schema) is treated as unset rather than an error.
    pub fn mock(&self) -> Option<MockResponse> {
        self.mock_response
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Captured webhook request model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CapturedRequest {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub method: String,
    pub path: String,
    pub headers: serde_json::Value,
    pub body: Option<String>,
    pub query_params: serde_json::Value,
    pub content_type: Option<String>,
    pub ip: String,
    pub size_bytes: i64,
    pub received_at: i64,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_default() {
        assert_eq!(Plan::default(), Plan::Free);
    }

    #[test]
    fn test_plan_limits() {
        assert_eq!(Plan::Free.request_limit(), 200);
        assert_eq!(Plan::Pro.request_limit(), 5_000);
        assert_eq!(Plan::Free.period_ms(), 24 * 60 * 60 * 1000);
        assert_eq!(Plan::Pro.period_ms(), 30 * 24 * 60 * 60 * 1000);
    }

    #[test]
    fn test_plan_retention_windows_differ() {
        assert!(Plan::Pro.retention_ms() > Plan::Free.retention_ms());
    }

    #[test]
    fn test_plan_display_and_parse() {
        assert_eq!(format!("{}", Plan::Free), "free");
        assert_eq!(format!("{}", Plan::Pro), "pro");
        assert_eq!("free".parse::<Plan>().unwrap(), Plan::Free);
        assert_eq!("PRO".parse::<Plan>().unwrap(), Plan::Pro);
        assert!("enterprise".parse::<Plan>().is_err());
    }

    #[test]
    fn test_mock_response_default() {
        let mock = MockResponse::default();
        assert_eq!(mock.status, 200);
        assert_eq!(mock.body, "OK");
        assert!(mock.headers.is_empty());
    }

    #[test]
    fn test_mock_response_sanitized_drops_blocked_headers() {
        let mut headers = HashMap::new();
        headers.insert("Set-Cookie".to_string(), "session=abc".to_string());
        headers.insert("X-Custom".to_string(), "ok".to_string());
        headers.insert("X-Bad".to_string(), "a\r\nInjected: yes".to_string());

        let mock = MockResponse {
            status: 201,
            body: "created".to_string(),
            headers,
        }
        .sanitized();

        assert_eq!(mock.headers.len(), 1);
        assert_eq!(mock.headers.get("X-Custom").map(String::as_str), Some("ok"));
    }

    #[test]
    fn test_mock_response_sanitized_clamps_status() {
        let mock = MockResponse {
            status: 999,
            body: String::new(),
            headers: HashMap::new(),
        }
        .sanitized();
        assert_eq!(mock.status, 200);
    }

    #[test]
    fn test_endpoint_expiry() {
        let endpoint = Endpoint {
            id: Uuid::new_v4(),
            slug: "test".to_string(),
            user_id: None,
            is_ephemeral: true,
            expires_at: Some(1_000),
            mock_response: None,
            request_count: 0,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(endpoint.is_expired(1_001));
        assert!(!endpoint.is_expired(1_000));
        assert!(!endpoint.is_expired(999));
    }

    #[test]
    fn test_endpoint_without_expiry_never_expires() {
        let endpoint = Endpoint {
            id: Uuid::new_v4(),
            slug: "test".to_string(),
            user_id: Some(Uuid::new_v4()),
            is_ephemeral: false,
            expires_at: None,
            mock_response: None,
            request_count: 0,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(!endpoint.is_expired(i64::MAX));
    }

    #[test]
    fn test_now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        // Sanity: later than 2024-01-01
        assert!(a > 1_704_067_200_000);
    }
}
