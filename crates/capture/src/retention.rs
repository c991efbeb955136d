//! Retention sweep
//!
//! Daily, plan-scoped instantiation of the batch-reaper pattern: pages
//! users on one plan, deletes each user's stored requests older than that
//! plan's retention cutoff, and defers a matching request-count decrement
//! for every deletion so the denormalized counter converges. A user whose
//! endpoints produced a full child batch gets a dedicated zero-delay drain
//! task instead of waiting for tomorrow's sweep.
//!
//! Plan scoping is structural: parents are selected by plan, so a pro
//! user's requests can never be touched by the free-tier sweep.

use sqlx::PgPool;
use uuid::Uuid;

use hookwell_shared::{now_ms, Plan};

use crate::error::CaptureResult;
use crate::reaper::{delete_request_batch, CHILD_BATCH_SIZE, PARENT_PAGE_SIZE};
use crate::tasks::{Task, TaskQueue};

#[derive(Clone)]
pub struct RetentionSweeper {
    pool: PgPool,
    queue: TaskQueue,
}

impl RetentionSweeper {
    pub fn new(pool: PgPool) -> Self {
        let queue = TaskQueue::new(pool.clone());
        Self { pool, queue }
    }

    /// One page of the daily sweep for `plan`.
    pub async fn sweep(&self, plan: Plan, cursor: Option<Uuid>) -> CaptureResult<()> {
        let cutoff = now_ms() - plan.retention_ms();

        let users: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM users
            WHERE plan = $1
              AND ($2::UUID IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(plan.to_string())
        .bind(cursor)
        .bind(PARENT_PAGE_SIZE)
        .fetch_all(&self.pool)
        .await?;

        if users.is_empty() {
            return Ok(());
        }

        for (user_id,) in &users {
            if self.drain_user_once(*user_id, cutoff).await? {
                // Full batch somewhere under this user: follow up now
                // rather than at the next daily sweep.
                self.queue
                    .enqueue(&Task::DrainUserRetention {
                        user_id: *user_id,
                        cutoff,
                    })
                    .await?;
            }
        }

        if users.len() == PARENT_PAGE_SIZE as usize {
            let (last,) = users[users.len() - 1];
            self.queue
                .enqueue(&Task::SweepRetention {
                    plan,
                    cursor: Some(last),
                })
                .await?;
        }
        Ok(())
    }

    /// Per-user drain task body: repeats itself while full batches remain.
    pub async fn drain_user(&self, user_id: Uuid, cutoff: i64) -> CaptureResult<()> {
        if self.drain_user_once(user_id, cutoff).await? {
            self.queue
                .enqueue(&Task::DrainUserRetention { user_id, cutoff })
                .await?;
        }
        Ok(())
    }

    /// Delete one child batch of over-retention requests per endpoint of
    /// `user_id`. Returns true when any endpoint yielded a full batch and
    /// may therefore have more.
    async fn drain_user_once(&self, user_id: Uuid, cutoff: i64) -> CaptureResult<bool> {
        let endpoints: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM endpoints WHERE user_id = $1 ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        let mut may_have_more = false;
        let mut total = 0u64;
        for (endpoint_id,) in endpoints {
            let deleted =
                delete_request_batch(&self.pool, endpoint_id, Some(cutoff), CHILD_BATCH_SIZE)
                    .await?;
            if deleted > 0 {
                total += deleted;
                self.queue
                    .enqueue(&Task::DecrementRequestCount {
                        endpoint_id,
                        count: deleted as i64,
                    })
                    .await?;
            }
            if deleted == CHILD_BATCH_SIZE as u64 {
                may_have_more = true;
            }
        }

        if total > 0 {
            tracing::info!(user_id = %user_id, requests_deleted = total, "Retention sweep removed old requests");
        }
        Ok(may_have_more)
    }
}
