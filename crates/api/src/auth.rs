//! Shared-secret authentication for the receiver boundary
//!
//! Every `/v1` route requires `Authorization: Bearer <secret>`, compared in
//! constant time. A deployment without a configured secret fails closed:
//! all calls are rejected with `server_misconfiguration` instead of letting
//! an unauthenticated receiver write captures.

use axum::{extract::Request, extract::State, middleware::Next, response::Response};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

/// Constant-time string comparison that does not leak length information.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        // Still do constant-time work to avoid leaking length
        let dummy = vec![0u8; a.len()];
        let _ = a.as_bytes().ct_eq(&dummy);
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Middleware guarding the receiver-facing routes.
pub async fn require_shared_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.capture_shared_secret.as_deref() else {
        tracing::error!("CAPTURE_SHARED_SECRET not configured, rejecting call");
        return Err(ApiError::ServerMisconfiguration);
    };

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if !constant_time_compare(provided, expected) {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "secret2"));
        assert!(!constant_time_compare("", "secret"));
        assert!(constant_time_compare("", ""));
    }
}
