//! End-to-end flows through the ingestion-and-accounting core
//!
//! These tests exercise the capture pipeline, quota oracle, period
//! activator, and deferred-task queue against a real Postgres with the
//! migrations applied.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://..."
//! cargo test -p hookwell-capture -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use hookwell_capture::{
    CaptureError, CaptureInput, CapturePipeline, PeriodActivator, QuotaOracle, TaskRunner,
};
use hookwell_shared::types::{FREE_PERIOD_MS, FREE_REQUEST_LIMIT};
use hookwell_shared::{now_ms, CapturedRequest, User};

// ============================================================================
// Test Utilities
// ============================================================================

async fn connect() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

/// Run the worker's drain loop until the queue stops yielding work.
async fn settle(runner: &TaskRunner) {
    loop {
        let claimed = runner.drain(64).await.expect("drain");
        if claimed == 0 {
            break;
        }
    }
}

fn sample_input() -> CaptureInput {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    CaptureInput {
        method: "POST".to_string(),
        path: "/hooks/test".to_string(),
        headers,
        body: Some(r#"{"event":"ping"}"#.to_string()),
        query_params: HashMap::new(),
        ip: "203.0.113.7".to_string(),
    }
}

async fn create_user(pool: &PgPool, plan: &str, limit: i64) -> Uuid {
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, plan, requests_used, request_limit) VALUES ($1, $2, 0, $3)")
        .bind(user_id)
        .bind(plan)
        .bind(limit)
        .execute(pool)
        .await
        .expect("insert user");
    user_id
}

async fn create_endpoint(pool: &PgPool, user_id: Option<Uuid>, expires_at: Option<i64>) -> String {
    let endpoint_id = Uuid::new_v4();
    let slug = format!("t-{}", &endpoint_id.simple().to_string()[..16]);
    sqlx::query(
        "INSERT INTO endpoints (id, slug, user_id, is_ephemeral, expires_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(endpoint_id)
    .bind(&slug)
    .bind(user_id)
    .bind(expires_at.is_some())
    .bind(expires_at)
    .execute(pool)
    .await
    .expect("insert endpoint");
    slug
}

async fn cleanup_user(pool: &PgPool, user_id: Uuid) {
    sqlx::query(
        "DELETE FROM requests WHERE endpoint_id IN (SELECT id FROM endpoints WHERE user_id = $1)",
    )
    .bind(user_id)
    .execute(pool)
    .await
    .ok();
    sqlx::query("DELETE FROM endpoints WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn concurrent_captures_settle_to_exact_counts() {
    let pool = connect().await;
    let user_id = create_user(&pool, "free", 200).await;
    let slug = create_endpoint(&pool, Some(user_id), None).await;

    let pipeline = CapturePipeline::new(pool.clone());
    let runner = TaskRunner::new(pool.clone());

    const N: usize = 20;
    let mut handles = Vec::new();
    for _ in 0..N {
        let pipeline = pipeline.clone();
        let slug = slug.clone();
        handles.push(tokio::spawn(async move {
            pipeline.capture(&slug, sample_input()).await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("capture");
    }

    settle(&runner).await;

    let (endpoint_id, request_count): (Uuid, i64) =
        sqlx::query_as("SELECT id, request_count FROM endpoints WHERE slug = $1")
            .bind(&slug)
            .fetch_one(&pool)
            .await
            .expect("fetch endpoint");
    let (stored,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM requests WHERE endpoint_id = $1")
        .bind(endpoint_id)
        .fetch_one(&pool)
        .await
        .expect("count requests");
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .expect("fetch user");

    assert_eq!(stored, N as i64);
    assert_eq!(request_count, N as i64);
    assert_eq!(user.requests_used, N as i64);

    // Stored rows carry the derived fields.
    let sample: CapturedRequest =
        sqlx::query_as("SELECT * FROM requests WHERE endpoint_id = $1 LIMIT 1")
            .bind(endpoint_id)
            .fetch_one(&pool)
            .await
            .expect("fetch request");
    assert_eq!(sample.method, "POST");
    assert_eq!(sample.content_type.as_deref(), Some("application/json"));
    assert_eq!(sample.size_bytes, r#"{"event":"ping"}"#.len() as i64);

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn capture_on_expired_endpoint_changes_nothing() {
    let pool = connect().await;
    let user_id = create_user(&pool, "free", 200).await;
    let slug = create_endpoint(&pool, Some(user_id), Some(now_ms() - 1_000)).await;

    let pipeline = CapturePipeline::new(pool.clone());
    let runner = TaskRunner::new(pool.clone());

    let err = pipeline.capture(&slug, sample_input()).await.unwrap_err();
    assert!(matches!(err, CaptureError::Expired));

    settle(&runner).await;

    let (endpoint_id, request_count): (Uuid, i64) =
        sqlx::query_as("SELECT id, request_count FROM endpoints WHERE slug = $1")
            .bind(&slug)
            .fetch_one(&pool)
            .await
            .expect("fetch endpoint");
    let (stored,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM requests WHERE endpoint_id = $1")
        .bind(endpoint_id)
        .fetch_one(&pool)
        .await
        .expect("count requests");
    let (requests_used,): (i64,) = sqlx::query_as("SELECT requests_used FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .expect("fetch user");

    assert_eq!(stored, 0);
    assert_eq!(request_count, 0);
    assert_eq!(requests_used, 0);

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn unknown_slug_is_not_found_everywhere() {
    let pool = connect().await;
    let oracle = QuotaOracle::new(pool.clone());
    let pipeline = CapturePipeline::new(pool);

    let err = oracle.get_quota("no-such-slug", now_ms()).await.unwrap_err();
    assert!(matches!(err, CaptureError::NotFound));

    let err = pipeline
        .capture("no-such-slug", sample_input())
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::NotFound));
}

#[tokio::test]
#[ignore] // Requires database
async fn free_user_first_capture_flow() {
    let pool = connect().await;
    let user_id = create_user(&pool, "free", FREE_REQUEST_LIMIT).await;
    let slug = create_endpoint(&pool, Some(user_id), None).await;

    let oracle = QuotaOracle::new(pool.clone());
    let activator = PeriodActivator::new(pool.clone());
    let pipeline = CapturePipeline::new(pool.clone());
    let runner = TaskRunner::new(pool.clone());

    // No active period: the oracle is optimistic and flags activation.
    let before = now_ms();
    let snapshot = oracle.get_quota(&slug, before).await.expect("quota");
    assert!(snapshot.needs_period_start);
    assert_eq!(snapshot.remaining, FREE_REQUEST_LIMIT);

    // Activation opens a 24h window with the full limit.
    let check = activator
        .check_and_start_period(user_id)
        .await
        .expect("activate");
    assert_eq!(check.remaining, FREE_REQUEST_LIMIT);
    let period_end = check.period_end.expect("period end set");
    assert!(period_end >= before + FREE_PERIOD_MS);

    // Capture and settle: exactly one usage unit consumed.
    pipeline
        .capture(&slug, sample_input())
        .await
        .expect("capture");
    settle(&runner).await;

    let (requests_used,): (i64,) = sqlx::query_as("SELECT requests_used FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .expect("fetch user");
    assert_eq!(requests_used, 1);

    let snapshot = oracle.get_quota(&slug, now_ms()).await.expect("quota");
    assert!(!snapshot.needs_period_start);
    assert_eq!(snapshot.remaining, FREE_REQUEST_LIMIT - 1);
    assert_eq!(snapshot.period_end, Some(period_end));

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn batch_capture_enqueues_single_counter_patch_pair() {
    let pool = connect().await;
    let user_id = create_user(&pool, "pro", 5_000).await;
    let slug = create_endpoint(&pool, Some(user_id), None).await;

    let pipeline = CapturePipeline::new(pool.clone());
    let runner = TaskRunner::new(pool.clone());

    let now = now_ms();
    let items: Vec<_> = (0..30)
        .map(|_| hookwell_capture::BatchCaptureItem {
            input: sample_input(),
            received_at: now,
        })
        .collect();
    let inserted = pipeline.capture_batch(&slug, &items).await.expect("batch");
    assert_eq!(inserted, 30);

    // One request-count task and one usage task for the whole batch.
    let (pending,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM deferred_tasks WHERE status = 'pending' AND task_type IN ('increment_request_count', 'increment_usage')",
    )
    .fetch_one(&pool)
    .await
    .expect("count tasks");
    assert_eq!(pending, 2);

    settle(&runner).await;

    let (request_count,): (i64,) =
        sqlx::query_as("SELECT request_count FROM endpoints WHERE slug = $1")
            .bind(&slug)
            .fetch_one(&pool)
            .await
            .expect("fetch endpoint");
    let (requests_used,): (i64,) = sqlx::query_as("SELECT requests_used FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .expect("fetch user");
    assert_eq!(request_count, 30);
    assert_eq!(requests_used, 30);

    cleanup_user(&pool, user_id).await;
}
