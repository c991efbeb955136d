//! Expired-endpoint reaper
//!
//! Self-rescheduling sweep over ephemeral endpoints past their TTL. Each
//! invocation processes one bounded page of parents and at most one child
//! batch per parent, then reschedules itself (next cursor) or a per-parent
//! follow-up drain as deferred tasks. Control flow is an explicit resumable
//! job carried in the task payload, never recursion, so a crashed worker
//! resumes where the last committed task left off.
//!
//! The endpoint row itself is always deleted on the first pass, even when a
//! drain is still pending: the expired address must stop resolving
//! immediately, and requests briefly outliving their endpoint is tolerated.

use sqlx::PgPool;
use uuid::Uuid;

use hookwell_shared::now_ms;

use crate::error::CaptureResult;
use crate::tasks::{Task, TaskQueue};

/// Parents per sweep invocation, sized to keep total child writes within a
/// single operation's write budget.
pub const PARENT_PAGE_SIZE: i64 = 25;

/// Child rows deleted per parent per invocation.
pub const CHILD_BATCH_SIZE: i64 = 100;

/// Delete up to `limit` stored requests for one endpoint, oldest first,
/// optionally restricted to those received before `older_than`. Returns the
/// number removed. Shared by the expiry and retention sweeps.
pub(crate) async fn delete_request_batch(
    pool: &PgPool,
    endpoint_id: Uuid,
    older_than: Option<i64>,
    limit: i64,
) -> CaptureResult<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM requests
        WHERE id IN (
            SELECT id FROM requests
            WHERE endpoint_id = $1
              AND ($2::BIGINT IS NULL OR received_at < $2)
            ORDER BY received_at ASC
            LIMIT $3
        )
        "#,
    )
    .bind(endpoint_id)
    .bind(older_than)
    .bind(limit)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Clone)]
pub struct ExpiryReaper {
    pool: PgPool,
    queue: TaskQueue,
}

impl ExpiryReaper {
    pub fn new(pool: PgPool) -> Self {
        let queue = TaskQueue::new(pool.clone());
        Self { pool, queue }
    }

    /// One page of the expiry sweep. Kicked off by the worker cron every
    /// few minutes with `cursor = None`.
    pub async fn sweep(&self, cursor: Option<Uuid>) -> CaptureResult<()> {
        let now = now_ms();
        let parents: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM endpoints
            WHERE is_ephemeral
              AND expires_at IS NOT NULL
              AND expires_at < $1
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

        if parents.is_empty() {
            return Ok(());
        }

        for (endpoint_id,) in &parents {
            let deleted =
                delete_request_batch(&self.pool, *endpoint_id, None, CHILD_BATCH_SIZE).await?;

            // Delete the endpoint now so the address stops being queryable;
            // leftover requests are drained by the follow-up task.
            sqlx::query("DELETE FROM endpoints WHERE id = $1")
                .bind(endpoint_id)
                .execute(&self.pool)
                .await?;

            if deleted == CHILD_BATCH_SIZE as u64 {
                self.queue
                    .enqueue(&Task::DrainEndpointRequests {
                        endpoint_id: *endpoint_id,
                    })
                    .await?;
            }
            tracing::info!(endpoint_id = %endpoint_id, requests_deleted = deleted, "Reaped expired endpoint");
        }

        if parents.len() == PARENT_PAGE_SIZE as usize {
            // More pages may remain; continue from the last parent.
            let (last,) = parents[parents.len() - 1];
            self.queue
                .enqueue(&Task::SweepExpiredEndpoints { cursor: Some(last) })
                .await?;
        }
        Ok(())
    }

    /// Follow-up drain for an endpoint deleted with requests left behind.
    /// Repeats itself while full batches keep coming.
    pub async fn drain_endpoint(&self, endpoint_id: Uuid) -> CaptureResult<()> {
        let deleted = delete_request_batch(&self.pool, endpoint_id, None, CHILD_BATCH_SIZE).await?;
        if deleted == CHILD_BATCH_SIZE as u64 {
            self.queue
                .enqueue(&Task::DrainEndpointRequests { endpoint_id })
                .await?;
        }
        if deleted > 0 {
            tracing::debug!(endpoint_id = %endpoint_id, requests_deleted = deleted, "Drained orphaned requests");
        }
        Ok(())
    }
}
