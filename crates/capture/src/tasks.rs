//! Durable deferred-task queue
//!
//! All asynchronous work in the core (counter patches, period resets,
//! reaper sweeps, account-deletion phases) runs as rows in the
//! `deferred_tasks` table, claimed with `FOR UPDATE SKIP LOCKED` so any
//! number of workers can drain the queue without double-execution. Tasks
//! scheduled "as soon as possible" carry `run_at = now`; timed tasks (the
//! free-period reset) carry a future `run_at`.
//!
//! Failed tasks stay in the table with their error and are re-claimed until
//! `max_attempts` is exhausted; every task body is additive/clamped or
//! re-checks its preconditions, so duplicate execution is harmless.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use hookwell_shared::{now_ms, Plan};

use crate::account::{AccountDeleter, DeletePhase};
use crate::accounting::Accountant;
use crate::error::CaptureResult;
use crate::period::PeriodActivator;
use crate::reaper::ExpiryReaper;
use crate::reconcile::PeriodReconciler;
use crate::retention::RetentionSweeper;

/// How many tasks a single drain pass claims.
pub const CLAIM_BATCH_SIZE: i64 = 32;

/// A unit of deferred work. The JSON tag doubles as the queue's
/// `task_type` column for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    IncrementUsage {
        user_id: Uuid,
        count: i64,
    },
    IncrementRequestCount {
        endpoint_id: Uuid,
        count: i64,
    },
    DecrementRequestCount {
        endpoint_id: Uuid,
        count: i64,
    },
    /// Timed reset scheduled by the period activator at the new period_end.
    ResetFreePeriod {
        user_id: Uuid,
        period_end: i64,
    },
    SweepExpiredEndpoints {
        cursor: Option<Uuid>,
    },
    /// Follow-up drain for requests left behind after an endpoint deletion.
    DrainEndpointRequests {
        endpoint_id: Uuid,
    },
    SweepRetention {
        plan: Plan,
        cursor: Option<Uuid>,
    },
    DrainUserRetention {
        user_id: Uuid,
        cutoff: i64,
    },
    DeleteAccount {
        user_id: Uuid,
        phase: DeletePhase,
    },
    ReconcileBillingPeriods {
        cursor: Option<Uuid>,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IncrementUsage { .. } => "increment_usage",
            Self::IncrementRequestCount { .. } => "increment_request_count",
            Self::DecrementRequestCount { .. } => "decrement_request_count",
            Self::ResetFreePeriod { .. } => "reset_free_period",
            Self::SweepExpiredEndpoints { .. } => "sweep_expired_endpoints",
            Self::DrainEndpointRequests { .. } => "drain_endpoint_requests",
            Self::SweepRetention { .. } => "sweep_retention",
            Self::DrainUserRetention { .. } => "drain_user_retention",
            Self::DeleteAccount { .. } => "delete_account",
            Self::ReconcileBillingPeriods { .. } => "reconcile_billing_periods",
        }
    }
}

/// A task claimed from the queue, ready to execute.
#[derive(Debug)]
pub struct ClaimedTask {
    pub id: Uuid,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
}

/// Handle to the deferred-task table.
#[derive(Clone)]
pub struct TaskQueue {
    pool: PgPool,
}

impl TaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Schedule a task to run as soon as possible.
    pub async fn enqueue(&self, task: &Task) -> CaptureResult<Uuid> {
        self.enqueue_at(task, now_ms()).await
    }

    /// Schedule a task to run at or after `run_at` (epoch ms).
    pub async fn enqueue_at(&self, task: &Task, run_at: i64) -> CaptureResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO deferred_tasks (id, task_type, payload, run_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(task.kind())
        .bind(serde_json::to_value(task)?)
        .bind(run_at)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Schedule a task inside the caller's transaction. The task becomes
    /// visible to workers only if the surrounding transaction commits, which
    /// is what ties the capture pipeline's row insert and its counter
    /// increments together.
    pub async fn enqueue_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        task: &Task,
        run_at: i64,
    ) -> CaptureResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO deferred_tasks (id, task_type, payload, run_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(task.kind())
        .bind(serde_json::to_value(task)?)
        .bind(run_at)
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }

    /// Claim up to `limit` runnable tasks. Each claimed row is marked
    /// `processing` with its attempt count bumped, so a crashed worker's
    /// tasks surface as exhausted-attempts failures rather than vanishing.
    pub async fn claim(&self, limit: i64) -> CaptureResult<Vec<ClaimedTask>> {
        let rows: Vec<(Uuid, serde_json::Value, i32, i32)> = sqlx::query_as(
            r#"
            UPDATE deferred_tasks
            SET status = 'processing', attempts = attempts + 1
            WHERE id IN (
                SELECT id FROM deferred_tasks
                WHERE run_at <= $1
                  AND (status = 'pending'
                       OR (status = 'failed' AND attempts < max_attempts))
                ORDER BY run_at ASC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts, max_attempts
            "#,
        )
        .bind(now_ms())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, payload, attempts, max_attempts)| ClaimedTask {
                id,
                payload,
                attempts,
                max_attempts,
            })
            .collect())
    }

    pub async fn complete(&self, id: Uuid) -> CaptureResult<()> {
        sqlx::query(
            "UPDATE deferred_tasks SET status = 'completed', processed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail(&self, id: Uuid, error: &str) -> CaptureResult<()> {
        sqlx::query(
            "UPDATE deferred_tasks SET status = 'failed', last_error = $2, processed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete completed and permanently-failed tasks older than
    /// `retention_days` (daily hygiene).
    pub async fn purge_finished(&self, retention_days: i32) -> CaptureResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM deferred_tasks
            WHERE created_at < NOW() - ($1 || ' days')::INTERVAL
              AND (status = 'completed'
                   OR (status = 'failed' AND attempts >= max_attempts))
            "#,
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Executes claimed tasks against the domain services.
#[derive(Clone)]
pub struct TaskRunner {
    queue: TaskQueue,
    accountant: Accountant,
    activator: PeriodActivator,
    reaper: ExpiryReaper,
    retention: RetentionSweeper,
    accounts: AccountDeleter,
    reconciler: PeriodReconciler,
}

impl TaskRunner {
    pub fn new(pool: PgPool) -> Self {
        Self {
            queue: TaskQueue::new(pool.clone()),
            accountant: Accountant::new(pool.clone()),
            activator: PeriodActivator::new(pool.clone()),
            reaper: ExpiryReaper::new(pool.clone()),
            retention: RetentionSweeper::new(pool.clone()),
            accounts: AccountDeleter::new(pool.clone()),
            reconciler: PeriodReconciler::new(pool),
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Execute one task body.
    pub async fn run(&self, task: Task) -> CaptureResult<()> {
        match task {
            Task::IncrementUsage { user_id, count } => {
                self.accountant.increment_usage(user_id, count).await
            }
            Task::IncrementRequestCount { endpoint_id, count } => {
                self.accountant
                    .increment_request_count(endpoint_id, count)
                    .await
            }
            Task::DecrementRequestCount { endpoint_id, count } => {
                self.accountant
                    .decrement_request_count(endpoint_id, count)
                    .await
            }
            Task::ResetFreePeriod { user_id, .. } => {
                self.activator.reset_expired_period(user_id).await
            }
            Task::SweepExpiredEndpoints { cursor } => self.reaper.sweep(cursor).await,
            Task::DrainEndpointRequests { endpoint_id } => {
                self.reaper.drain_endpoint(endpoint_id).await
            }
            Task::SweepRetention { plan, cursor } => self.retention.sweep(plan, cursor).await,
            Task::DrainUserRetention { user_id, cutoff } => {
                self.retention.drain_user(user_id, cutoff).await
            }
            Task::DeleteAccount { user_id, phase } => {
                self.accounts.run_phase(user_id, phase).await
            }
            Task::ReconcileBillingPeriods { cursor } => self.reconciler.sweep(cursor).await,
        }
    }

    /// Claim a batch of runnable tasks and execute them sequentially.
    /// Returns how many tasks were claimed; callers loop while this is
    /// non-zero and sleep when the queue is empty.
    pub async fn drain(&self, limit: i64) -> CaptureResult<usize> {
        let claimed = self.queue.claim(limit).await?;
        let count = claimed.len();

        for item in claimed {
            let task: Task = match serde_json::from_value(item.payload.clone()) {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!(task_id = %item.id, error = %e, "Undecodable task payload");
                    self.queue
                        .fail(item.id, &format!("payload decode: {e}"))
                        .await?;
                    continue;
                }
            };

            match self.run(task.clone()).await {
                Ok(()) => {
                    self.queue.complete(item.id).await?;
                }
                Err(e) => {
                    if item.attempts >= item.max_attempts {
                        tracing::error!(
                            task_id = %item.id,
                            task_type = task.kind(),
                            attempts = item.attempts,
                            error = %e,
                            "Task permanently failed after max retries"
                        );
                    } else {
                        tracing::warn!(
                            task_id = %item.id,
                            task_type = task.kind(),
                            attempts = item.attempts,
                            max_attempts = item.max_attempts,
                            error = %e,
                            "Task failed, will retry"
                        );
                    }
                    self.queue.fail(item.id, &e.to_string()).await?;
                }
            }
        }

        Ok(count)
    }
}
