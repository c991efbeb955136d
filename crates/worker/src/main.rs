//! Hookwell background worker
//!
//! Owns the two asynchronous halves of the core: a tight loop draining the
//! deferred-task queue, and the cron schedule that seeds the recurring
//! sweeps (endpoint expiry, plan retention, billing reconciliation, queue
//! hygiene). Multiple worker instances can run side by side; the queue's
//! SKIP LOCKED claim keeps them from double-executing tasks.

use std::time::Duration;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookwell_capture::tasks::CLAIM_BATCH_SIZE;
use hookwell_capture::{Task, TaskQueue, TaskRunner};
use hookwell_shared::Plan;

/// Expired-endpoint sweep cadence.
const EXPIRY_SWEEP_SCHEDULE: &str = "0 */5 * * * *";
/// Daily retention sweeps, staggered per plan.
const RETENTION_FREE_SCHEDULE: &str = "0 10 3 * * *";
const RETENTION_PRO_SCHEDULE: &str = "0 25 3 * * *";
/// Daily billing-period reconciliation.
const RECONCILE_SCHEDULE: &str = "0 40 4 * * *";
/// Daily queue hygiene.
const QUEUE_PURGE_SCHEDULE: &str = "0 55 4 * * *";

/// Completed/exhausted tasks are kept a week for inspection.
const TASK_RETENTION_DAYS: i32 = 7;

/// How long the drain loop sleeps when the queue is empty.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookwell_worker=info,hookwell_capture=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "5".to_string())
        .parse()
        .unwrap_or(5);

    let pool = hookwell_shared::db::create_pool(&database_url, max_connections)
        .await
        .context("connecting to database")?;

    let runner = TaskRunner::new(pool.clone());
    let queue = TaskQueue::new(pool);

    let scheduler = JobScheduler::new().await.context("creating scheduler")?;

    add_kickoff_job(
        &scheduler,
        EXPIRY_SWEEP_SCHEDULE,
        queue.clone(),
        Task::SweepExpiredEndpoints { cursor: None },
    )
    .await?;
    add_kickoff_job(
        &scheduler,
        RETENTION_FREE_SCHEDULE,
        queue.clone(),
        Task::SweepRetention {
            plan: Plan::Free,
            cursor: None,
        },
    )
    .await?;
    add_kickoff_job(
        &scheduler,
        RETENTION_PRO_SCHEDULE,
        queue.clone(),
        Task::SweepRetention {
            plan: Plan::Pro,
            cursor: None,
        },
    )
    .await?;
    add_kickoff_job(
        &scheduler,
        RECONCILE_SCHEDULE,
        queue.clone(),
        Task::ReconcileBillingPeriods { cursor: None },
    )
    .await?;

    let purge_queue = queue.clone();
    scheduler
        .add(Job::new_async(QUEUE_PURGE_SCHEDULE, move |_id, _sched| {
            let queue = purge_queue.clone();
            Box::pin(async move {
                match queue.purge_finished(TASK_RETENTION_DAYS).await {
                    Ok(purged) if purged > 0 => {
                        tracing::info!(purged, "Purged finished deferred tasks")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Queue purge failed"),
                }
            })
        })?)
        .await
        .context("adding purge job")?;

    scheduler.start().await.context("starting scheduler")?;
    tracing::info!("Hookwell worker started");

    loop {
        match runner.drain(CLAIM_BATCH_SIZE).await {
            // Empty queue: idle until the next poll.
            Ok(0) => tokio::time::sleep(IDLE_POLL_INTERVAL).await,
            Ok(count) => {
                tracing::debug!(count, "Drained deferred tasks");
            }
            Err(e) => {
                tracing::error!(error = %e, "Task drain failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Register a cron job that enqueues a kick-off task. The sweeps themselves
/// run through the queue like everything else, so a crashed worker never
/// loses an in-flight sweep: its continuation task is already durable.
async fn add_kickoff_job(
    scheduler: &JobScheduler,
    schedule: &str,
    queue: TaskQueue,
    task: Task,
) -> anyhow::Result<()> {
    let job = Job::new_async(schedule, move |_id, _sched| {
        let queue = queue.clone();
        let task = task.clone();
        Box::pin(async move {
            tracing::info!(task_type = task.kind(), "Cron kick-off");
            if let Err(e) = queue.enqueue(&task).await {
                tracing::error!(task_type = task.kind(), error = %e, "Failed to enqueue cron task");
            }
        })
    })
    .with_context(|| format!("building cron job {schedule}"))?;

    scheduler
        .add(job)
        .await
        .with_context(|| format!("adding cron job {schedule}"))?;
    Ok(())
}
