//! Quota-period activation
//!
//! Free-plan periods start lazily on first traffic instead of on a timer:
//! they are short (24h) and only matter when requests actually arrive. This
//! module is the only code path allowed to mutate a free user's period
//! window; the pro-tier counterpart lives in `reconcile`.
//!
//! Concurrency: activation runs as a read-modify-write inside one
//! transaction holding the user row lock. Two near-simultaneous calls for
//! the same user serialize on that lock; the loser re-reads the winner's
//! freshly-written period and takes the "already active" branch instead of
//! double-resetting usage.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use hookwell_shared::types::{FREE_PERIOD_MS, FREE_RETENTION_MS};
use hookwell_shared::{now_ms, Plan};

use crate::error::{CaptureError, CaptureResult};
use crate::tasks::{Task, TaskQueue};

/// Result of a period check for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodCheck {
    pub remaining: i64,
    pub limit: i64,
    pub period_end: Option<i64>,
}

/// What the activator should do for a given user state.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Non-free plan: report current usage, mutate nothing.
    PassThrough,
    /// A live period exists with headroom.
    AlreadyActive,
    /// A live period exists and is exhausted.
    Exceeded { retry_after_ms: i64 },
    /// No live period: start one now.
    StartNew,
}

/// Pure decision for `check_and_start_period`, split out so the branch
/// table is testable without a database.
pub fn decide(plan: Plan, requests_used: i64, request_limit: i64, period_end: Option<i64>, now: i64) -> Activation {
    if plan != Plan::Free {
        return Activation::PassThrough;
    }
    match period_end {
        Some(period_end) if period_end > now => {
            if requests_used >= request_limit {
                Activation::Exceeded {
                    retry_after_ms: period_end - now,
                }
            } else {
                Activation::AlreadyActive
            }
        }
        _ => Activation::StartNew,
    }
}

#[derive(Clone)]
pub struct PeriodActivator {
    pool: PgPool,
}

impl PeriodActivator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check a user's quota period, lazily starting a fresh one for free
    /// users whose previous period is absent or expired.
    pub async fn check_and_start_period(&self, user_id: Uuid) -> CaptureResult<PeriodCheck> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, i64, i64, Option<i64>)> = sqlx::query_as(
            "SELECT plan, requests_used, request_limit, period_end FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((plan, requests_used, request_limit, period_end)) = row else {
            return Err(CaptureError::NotFound);
        };
        let plan: Plan = plan.parse().unwrap_or_default();

        match decide(plan, requests_used, request_limit, period_end, now) {
            Activation::PassThrough | Activation::AlreadyActive => {
                tx.commit().await?;
                Ok(PeriodCheck {
                    remaining: (request_limit - requests_used).max(0),
                    limit: request_limit,
                    period_end,
                })
            }
            Activation::Exceeded { retry_after_ms } => {
                tx.commit().await?;
                Err(CaptureError::QuotaExceeded { retry_after_ms })
            }
            Activation::StartNew => {
                let new_end = now + FREE_PERIOD_MS;
                sqlx::query(
                    "UPDATE users SET period_start = $2, period_end = $3, requests_used = 0 WHERE id = $1",
                )
                .bind(user_id)
                .bind(now)
                .bind(new_end)
                .execute(&mut *tx)
                .await?;

                // Timed reset fires exactly at the new period end.
                TaskQueue::enqueue_in_tx(
                    &mut tx,
                    &Task::ResetFreePeriod {
                        user_id,
                        period_end: new_end,
                    },
                    new_end,
                )
                .await?;
                tx.commit().await?;

                tracing::info!(user_id = %user_id, period_end = new_end, "Started free quota period");
                Ok(PeriodCheck {
                    remaining: request_limit,
                    limit: request_limit,
                    period_end: Some(new_end),
                })
            }
        }
    }

    /// Timed reset task body: return an expired free period to the lazy
    /// "no period" state and kick off a scoped cleanup of the user's stored
    /// requests. The next period starts on the next capture, not here.
    ///
    /// No-op when the user was deleted, upgraded to pro, or already holds a
    /// newer live period (this task raced with a fresh activation).
    pub async fn reset_expired_period(&self, user_id: Uuid) -> CaptureResult<()> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT plan, period_end FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((plan, period_end)) = row else {
            tracing::debug!(user_id = %user_id, "Period reset on deleted user, skipping");
            return Ok(());
        };

        if plan.parse::<Plan>().unwrap_or_default() != Plan::Free {
            tracing::debug!(user_id = %user_id, "Period reset on upgraded user, skipping");
            tx.commit().await?;
            return Ok(());
        }

        match period_end {
            Some(period_end) if period_end <= now => {
                sqlx::query(
                    "UPDATE users SET period_start = NULL, period_end = NULL, requests_used = 0 WHERE id = $1",
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

                // Keep storage bounded across periods: sweep this user's
                // requests past the free retention window.
                TaskQueue::enqueue_in_tx(
                    &mut tx,
                    &Task::DrainUserRetention {
                        user_id,
                        cutoff: now - FREE_RETENTION_MS,
                    },
                    now,
                )
                .await?;
                tx.commit().await?;
                tracing::info!(user_id = %user_id, "Cleared expired free quota period");
            }
            _ => {
                // Absent (already lazy) or a newer live period: nothing to do.
                tx.commit().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pro_plan_is_pass_through() {
        assert_eq!(decide(Plan::Pro, 9_999, 5_000, Some(1), 100), Activation::PassThrough);
        assert_eq!(decide(Plan::Pro, 0, 5_000, None, 100), Activation::PassThrough);
    }

    #[test]
    fn test_missing_period_starts_new() {
        assert_eq!(decide(Plan::Free, 150, 200, None, 100), Activation::StartNew);
    }

    #[test]
    fn test_expired_period_starts_new() {
        assert_eq!(decide(Plan::Free, 200, 200, Some(99), 100), Activation::StartNew);
        // Boundary: a period ending exactly now is expired.
        assert_eq!(decide(Plan::Free, 0, 200, Some(100), 100), Activation::StartNew);
    }

    #[test]
    fn test_live_period_with_headroom() {
        assert_eq!(decide(Plan::Free, 199, 200, Some(500), 100), Activation::AlreadyActive);
    }

    #[test]
    fn test_live_period_exhausted_reports_retry_after() {
        assert_eq!(
            decide(Plan::Free, 200, 200, Some(500), 100),
            Activation::Exceeded { retry_after_ms: 400 }
        );
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_concurrent_activation_is_idempotent() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect");

        let user_id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, plan, requests_used, request_limit) VALUES ($1, 'free', 0, 200)")
            .bind(user_id)
            .execute(&pool)
            .await
            .expect("insert user");

        let activator = PeriodActivator::new(pool.clone());
        let (a, b) = tokio::join!(
            activator.check_and_start_period(user_id),
            activator.check_and_start_period(user_id),
        );
        let a = a.expect("first activation");
        let b = b.expect("second activation");

        // Both observe the same period; usage was reset exactly once.
        assert_eq!(a.period_end, b.period_end);
        let (used,): (i64,) = sqlx::query_as("SELECT requests_used FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .expect("fetch");
        assert_eq!(used, 0);

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&pool)
            .await
            .expect("cleanup");
    }
}
