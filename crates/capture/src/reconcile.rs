//! Billing-period reconciliation
//!
//! Daily sweep over pro users whose paid period has lapsed. This is the
//! eager, timer-driven counterpart of the lazy free-period activator: pro
//! periods are long and predictable, so they roll on a schedule instead of
//! on first traffic. Only users with `period_end <= now` are touched, which
//! is what keeps this writer from racing the billing-event translator.

use sqlx::PgPool;
use uuid::Uuid;

use hookwell_shared::types::{BILLING_CYCLE_MS, FREE_REQUEST_LIMIT};
use hookwell_shared::now_ms;

use crate::error::CaptureResult;
use crate::reaper::PARENT_PAGE_SIZE;
use crate::tasks::{Task, TaskQueue};

/// What to do with a lapsed pro period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodPatch {
    /// Subscription ends with the period: drop to the free plan and clear
    /// all period/subscription state in one patch.
    Downgrade,
    /// Subscription continues: roll the window forward and reset usage.
    Roll { period_start: i64, period_end: i64 },
}

/// Pure patch decision for one user.
pub fn reconcile_patch(cancel_at_period_end: bool, old_period_end: i64) -> PeriodPatch {
    if cancel_at_period_end {
        PeriodPatch::Downgrade
    } else {
        PeriodPatch::Roll {
            period_start: old_period_end,
            period_end: old_period_end + BILLING_CYCLE_MS,
        }
    }
}

#[derive(Clone)]
pub struct PeriodReconciler {
    pool: PgPool,
    queue: TaskQueue,
}

impl PeriodReconciler {
    pub fn new(pool: PgPool) -> Self {
        let queue = TaskQueue::new(pool.clone());
        Self { pool, queue }
    }

    /// One page of the daily reconciliation sweep.
    pub async fn sweep(&self, cursor: Option<Uuid>) -> CaptureResult<()> {
        let now = now_ms();
        let users: Vec<(Uuid, i64, bool)> = sqlx::query_as(
            r#"
            SELECT id, period_end, cancel_at_period_end FROM users
            WHERE plan = 'pro'
              AND period_end IS NOT NULL
              AND period_end <= $1
              AND ($2::UUID IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(cursor)
        .bind(PARENT_PAGE_SIZE)
        .fetch_all(&self.pool)
        .await?;

        if users.is_empty() {
            return Ok(());
        }

        for (user_id, period_end, cancel_at_period_end) in &users {
            match reconcile_patch(*cancel_at_period_end, *period_end) {
                PeriodPatch::Downgrade => {
                    sqlx::query(
                        r#"
                        UPDATE users SET
                            plan = 'free',
                            request_limit = $2,
                            requests_used = 0,
                            period_start = NULL,
                            period_end = NULL,
                            cancel_at_period_end = FALSE,
                            subscription_status = NULL,
                            polar_subscription_id = NULL
                        WHERE id = $1
                        "#,
                    )
                    .bind(user_id)
                    .bind(FREE_REQUEST_LIMIT)
                    .execute(&self.pool)
                    .await?;
                    tracing::info!(user_id = %user_id, "Downgraded canceled pro subscription");
                }
                PeriodPatch::Roll {
                    period_start,
                    period_end,
                } => {
                    sqlx::query(
                        "UPDATE users SET period_start = $2, period_end = $3, requests_used = 0 WHERE id = $1",
                    )
                    .bind(user_id)
                    .bind(period_start)
                    .bind(period_end)
                    .execute(&self.pool)
                    .await?;
                    tracing::info!(user_id = %user_id, period_end, "Rolled pro billing period");
                }
            }
        }

        if users.len() == PARENT_PAGE_SIZE as usize {
            let (last, _, _) = users[users.len() - 1];
            self.queue
                .enqueue(&Task::ReconcileBillingPeriods { cursor: Some(last) })
                .await?;
        }
        Ok(())
    }
}
