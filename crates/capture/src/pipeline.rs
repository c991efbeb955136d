//! Capture pipeline
//!
//! Persists inbound webhook traffic. Admission (quota) is decided by the
//! receiver via the oracle/activator *before* this runs; the pipeline
//! deliberately does not re-check it, so the hot path never reads or
//! writes the user row. Counter updates go through the deferred-task
//! queue, enqueued in the same transaction as the request insert.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use hookwell_shared::{now_ms, MockResponse};

use crate::error::{CaptureError, CaptureResult};
use crate::tasks::{Task, TaskQueue};

/// Raw request fields forwarded by the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureInput {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub ip: String,
}

/// A batch item additionally carries its receiver-side receipt time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCaptureItem {
    #[serde(flatten)]
    pub input: CaptureInput,
    pub received_at: i64,
}

/// Successful capture result.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub mock_response: MockResponse,
}

struct ResolvedEndpoint {
    id: Uuid,
    user_id: Option<Uuid>,
    mock_response: Option<serde_json::Value>,
}

/// Case-insensitive `content-type` lookup over the captured header map.
pub fn derive_content_type(headers: &HashMap<String, String>) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.clone())
}

#[derive(Clone)]
pub struct CapturePipeline {
    pool: PgPool,
}

impl CapturePipeline {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn resolve(&self, slug: &str, now: i64) -> CaptureResult<ResolvedEndpoint> {
        let row: Option<(Uuid, Option<Uuid>, Option<i64>, Option<serde_json::Value>)> =
            sqlx::query_as(
                "SELECT id, user_id, expires_at, mock_response FROM endpoints WHERE slug = $1",
            )
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        let Some((id, user_id, expires_at, mock_response)) = row else {
            return Err(CaptureError::NotFound);
        };
        if matches!(expires_at, Some(expires_at) if expires_at < now) {
            return Err(CaptureError::Expired);
        }
        Ok(ResolvedEndpoint {
            id,
            user_id,
            mock_response,
        })
    }

    async fn insert_request(
        tx: &mut Transaction<'_, Postgres>,
        endpoint_id: Uuid,
        input: &CaptureInput,
        received_at: i64,
    ) -> CaptureResult<()> {
        let content_type = derive_content_type(&input.headers);
        let size_bytes = input.body.as_ref().map(|b| b.len() as i64).unwrap_or(0);

        sqlx::query(
            r#"
            INSERT INTO requests (
                id, endpoint_id, method, path, headers, body,
                query_params, content_type, ip, size_bytes, received_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(endpoint_id)
        .bind(&input.method)
        .bind(&input.path)
        .bind(serde_json::to_value(&input.headers)?)
        .bind(&input.body)
        .bind(serde_json::to_value(&input.query_params)?)
        .bind(content_type)
        .bind(&input.ip)
        .bind(size_bytes)
        .bind(received_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Capture a single request. Inserts the row and defers both counter
    /// increments; returns the endpoint's configured mock response
    /// (defaulting to `200 OK`).
    pub async fn capture(&self, slug: &str, input: CaptureInput) -> CaptureResult<CaptureOutcome> {
        let now = now_ms();
        let endpoint = self.resolve(slug, now).await?;

        let mut tx = self.pool.begin().await?;
        Self::insert_request(&mut tx, endpoint.id, &input, now).await?;
        TaskQueue::enqueue_in_tx(
            &mut tx,
            &Task::IncrementRequestCount {
                endpoint_id: endpoint.id,
                count: 1,
            },
            now,
        )
        .await?;
        if let Some(user_id) = endpoint.user_id {
            TaskQueue::enqueue_in_tx(&mut tx, &Task::IncrementUsage { user_id, count: 1 }, now)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(slug, endpoint_id = %endpoint.id, "Captured request");
        Ok(CaptureOutcome {
            mock_response: mock_for(endpoint.mock_response),
        })
    }

    /// Capture an ordered batch in one atomic unit. Exactly one deferred
    /// request-count increment (by N) and at most one usage increment
    /// (by N) are issued for the whole batch, bounding queue growth under
    /// high fan-in.
    pub async fn capture_batch(
        &self,
        slug: &str,
        items: &[BatchCaptureItem],
    ) -> CaptureResult<usize> {
        let now = now_ms();
        let endpoint = self.resolve(slug, now).await?;
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for item in items {
            Self::insert_request(&mut tx, endpoint.id, &item.input, item.received_at).await?;
        }

        let count = items.len() as i64;
        TaskQueue::enqueue_in_tx(
            &mut tx,
            &Task::IncrementRequestCount {
                endpoint_id: endpoint.id,
                count,
            },
            now,
        )
        .await?;
        if let Some(user_id) = endpoint.user_id {
            TaskQueue::enqueue_in_tx(&mut tx, &Task::IncrementUsage { user_id, count }, now)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(slug, inserted = items.len(), "Captured batch");
        Ok(items.len())
    }
}

fn mock_for(stored: Option<serde_json::Value>) -> MockResponse {
    stored
        .and_then(|v| serde_json::from_value::<MockResponse>(v).ok())
        .map(MockResponse::sanitized)
        .unwrap_or_default()
}
