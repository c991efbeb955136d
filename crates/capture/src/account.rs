//! Cascading account deletion
//!
//! Phase-ordered instantiation of the batch-reaper pattern. Deletion walks
//! a fixed phase list (requests → endpoints → api keys → sessions → auth
//! accounts → user record); each phase removes one bounded batch and
//! re-enqueues itself until short, then advances. The user row goes last,
//! so every earlier phase can still resolve its parent, and traffic
//! arriving mid-deletion hits the oracle's fail-open orphan branch instead
//! of an error.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CaptureResult;
use crate::reaper::CHILD_BATCH_SIZE;
use crate::tasks::{Task, TaskQueue};

/// Deletion phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePhase {
    Requests,
    Endpoints,
    ApiKeys,
    Sessions,
    AuthAccounts,
    User,
}

impl DeletePhase {
    /// The phase to run after this one completes; `None` after the user
    /// record itself is gone.
    pub fn next(self) -> Option<DeletePhase> {
        match self {
            Self::Requests => Some(Self::Endpoints),
            Self::Endpoints => Some(Self::ApiKeys),
            Self::ApiKeys => Some(Self::Sessions),
            Self::Sessions => Some(Self::AuthAccounts),
            Self::AuthAccounts => Some(Self::User),
            Self::User => None,
        }
    }
}

#[derive(Clone)]
pub struct AccountDeleter {
    pool: PgPool,
    queue: TaskQueue,
}

impl AccountDeleter {
    pub fn new(pool: PgPool) -> Self {
        let queue = TaskQueue::new(pool.clone());
        Self { pool, queue }
    }

    /// Kick off deletion. Fire-and-forget from the caller's perspective:
    /// this only enqueues the first phase.
    pub async fn start(&self, user_id: Uuid) -> CaptureResult<()> {
        self.queue
            .enqueue(&Task::DeleteAccount {
                user_id,
                phase: DeletePhase::Requests,
            })
            .await?;
        tracing::info!(user_id = %user_id, "Account deletion started");
        Ok(())
    }

    /// Run one batch of one phase, then enqueue the continuation.
    pub async fn run_phase(&self, user_id: Uuid, phase: DeletePhase) -> CaptureResult<()> {
        let deleted = match phase {
            DeletePhase::Requests => {
                sqlx::query(
                    r#"
                    DELETE FROM requests
                    WHERE id IN (
                        SELECT r.id FROM requests r
                        JOIN endpoints e ON e.id = r.endpoint_id
                        WHERE e.user_id = $1
                        LIMIT $2
                    )
                    "#,
                )
                .bind(user_id)
                .bind(CHILD_BATCH_SIZE)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            DeletePhase::Endpoints => self.delete_batch("endpoints", user_id).await?,
            DeletePhase::ApiKeys => self.delete_batch("api_keys", user_id).await?,
            DeletePhase::Sessions => self.delete_batch("sessions", user_id).await?,
            DeletePhase::AuthAccounts => self.delete_batch("auth_accounts", user_id).await?,
            DeletePhase::User => {
                sqlx::query("DELETE FROM users WHERE id = $1")
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
                tracing::info!(user_id = %user_id, "Account deletion finished");
                return Ok(());
            }
        };

        let next_phase = if deleted == CHILD_BATCH_SIZE as u64 {
            // A full batch may mean more rows; repeat this phase.
            phase
        } else {
            match phase.next() {
                Some(next) => next,
                None => return Ok(()),
            }
        };

        self.queue
            .enqueue(&Task::DeleteAccount {
                user_id,
                phase: next_phase,
            })
            .await?;
        tracing::debug!(user_id = %user_id, phase = ?phase, deleted, next = ?next_phase, "Account deletion phase complete");
        Ok(())
    }

    async fn delete_batch(&self, table: &str, user_id: Uuid) -> CaptureResult<u64> {
        // Table names come from the fixed phase list above, never input.
        let sql = format!(
            "DELETE FROM {table} WHERE id IN (SELECT id FROM {table} WHERE user_id = $1 LIMIT $2)"
        );
        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(CHILD_BATCH_SIZE)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
