//! Boundary validation for capture input
//!
//! The receiver must pass these checks before either capture form runs;
//! the pipeline itself trusts its caller. Everything here is a pure check
//! returning the typed validation errors from the core taxonomy.

use hookwell_shared::types::{
    MAX_BATCH_SIZE, MAX_BODY_BYTES, MAX_HEADER_COUNT, MAX_HEADER_KEY_LEN, MAX_HEADER_VALUE_LEN,
    MAX_IP_LEN, MAX_PATH_BYTES, MAX_QUERY_PARAM_COUNT, RECEIVED_AT_FUTURE_SLACK_MS,
    RECEIVED_AT_PAST_SLACK_MS,
};

use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::{BatchCaptureItem, CaptureInput};

/// Methods accepted for captured traffic.
pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Slug format: 1-50 chars of `[A-Za-z0-9_-]`.
pub fn validate_slug(slug: &str) -> CaptureResult<()> {
    if slug.is_empty() || slug.len() > 50 {
        return Err(CaptureError::InvalidSlug);
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(CaptureError::InvalidSlug);
    }
    Ok(())
}

/// A stored IP is either empty (receiver could not determine one) or a
/// plausible IPv4/IPv6 literal: bounded length, IP charset only. Anything
/// else is rejected rather than sanitized, since a spoofed header stored
/// verbatim is an XSS vector for whoever renders it later.
fn is_valid_ip(ip: &str) -> bool {
    if ip.is_empty() {
        return true;
    }
    ip.len() <= MAX_IP_LEN
        && ip
            .bytes()
            .all(|b| b.is_ascii_hexdigit() || b == b'.' || b == b':' || b == b'[' || b == b']' || b == b'%')
}

fn validate_fields(input: &CaptureInput) -> CaptureResult<()> {
    if !ALLOWED_METHODS.contains(&input.method.as_str()) {
        return Err(CaptureError::InvalidMethod);
    }
    if input.path.is_empty() || !input.path.starts_with('/') || input.path.len() > MAX_PATH_BYTES {
        return Err(CaptureError::InvalidPath);
    }
    if !is_valid_ip(&input.ip) {
        return Err(CaptureError::InvalidIp);
    }
    if input.headers.len() > MAX_HEADER_COUNT {
        return Err(CaptureError::InvalidHeaders);
    }
    for (key, value) in &input.headers {
        if key.is_empty() || key.len() > MAX_HEADER_KEY_LEN || value.len() > MAX_HEADER_VALUE_LEN {
            return Err(CaptureError::InvalidHeaders);
        }
    }
    if input.query_params.len() > MAX_QUERY_PARAM_COUNT {
        return Err(CaptureError::InvalidQueryParams);
    }
    if let Some(body) = &input.body {
        if body.len() > MAX_BODY_BYTES {
            return Err(CaptureError::BodyTooLarge);
        }
    }
    Ok(())
}

/// Validate a single capture call.
pub fn validate_single(slug: &str, input: &CaptureInput) -> CaptureResult<()> {
    validate_slug(slug)?;
    validate_fields(input)
}

/// Validate a batch capture call. Batch items carry their own receipt time
/// and must fall inside the freshness window: receiver buffering explains a
/// minute of lag, anything older (or ahead of our clock beyond skew slack)
/// is a backdating attempt or a broken clock.
pub fn validate_batch(slug: &str, items: &[BatchCaptureItem], now: i64) -> CaptureResult<()> {
    validate_slug(slug)?;
    if items.len() > MAX_BATCH_SIZE {
        return Err(CaptureError::BatchTooLarge);
    }
    for item in items {
        validate_fields(&item.input)?;
        if item.received_at < now - RECEIVED_AT_PAST_SLACK_MS
            || item.received_at > now + RECEIVED_AT_FUTURE_SLACK_MS
        {
            return Err(CaptureError::InvalidTimestamp);
        }
    }
    Ok(())
}
