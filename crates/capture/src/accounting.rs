//! Counter accounting
//!
//! Clamped, no-op-safe patches for the two denormalized counters:
//! per-user `requests_used` and per-endpoint `request_count`. These run as
//! deferred tasks scheduled by the capture pipeline and the reapers, never
//! inline with a user-facing request. Each patch is a single atomic UPDATE
//! against its own row, so patches for different owners commute freely and
//! duplicates only ever over-count by an amount the clamp bounds.

use sqlx::PgPool;
use uuid::Uuid;

use hookwell_shared::types::MAX_COUNTER_PATCH;

use crate::error::CaptureResult;

/// Clamp an increment into the accepted per-patch range. Non-positive
/// counts yield 0, which callers treat as "nothing to do".
pub fn clamp_count(count: i64) -> i64 {
    if count <= 0 {
        return 0;
    }
    count.min(MAX_COUNTER_PATCH)
}

#[derive(Clone)]
pub struct Accountant {
    pool: PgPool,
}

impl Accountant {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add `count` to a user's period usage. No-op when the user row is
    /// gone (account deleted while tasks were queued).
    pub async fn increment_usage(&self, user_id: Uuid, count: i64) -> CaptureResult<()> {
        let count = clamp_count(count);
        if count == 0 {
            return Ok(());
        }

        let result = sqlx::query("UPDATE users SET requests_used = requests_used + $2 WHERE id = $1")
            .bind(user_id)
            .bind(count)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(user_id = %user_id, "Usage increment on deleted user, skipping");
        }
        Ok(())
    }

    /// Add `count` to an endpoint's denormalized request count. No-op when
    /// the endpoint row is gone (reaped while tasks were queued).
    pub async fn increment_request_count(&self, endpoint_id: Uuid, count: i64) -> CaptureResult<()> {
        let count = clamp_count(count);
        if count == 0 {
            return Ok(());
        }

        let result =
            sqlx::query("UPDATE endpoints SET request_count = request_count + $2 WHERE id = $1")
                .bind(endpoint_id)
                .bind(count)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(endpoint_id = %endpoint_id, "Request-count increment on deleted endpoint, skipping");
        }
        Ok(())
    }

    /// Subtract `count` from an endpoint's request count, flooring at zero.
    /// Used by the retention sweeps after deleting stored requests.
    pub async fn decrement_request_count(&self, endpoint_id: Uuid, count: i64) -> CaptureResult<()> {
        let count = clamp_count(count);
        if count == 0 {
            return Ok(());
        }

        let result = sqlx::query(
            "UPDATE endpoints SET request_count = GREATEST(request_count - $2, 0) WHERE id = $1",
        )
        .bind(endpoint_id)
        .bind(count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(endpoint_id = %endpoint_id, "Request-count decrement on deleted endpoint, skipping");
        }
        Ok(())
    }
}
