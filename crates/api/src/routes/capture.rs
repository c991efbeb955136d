//! Capture routes

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use hookwell_capture::validate::{validate_batch, validate_single};
use hookwell_capture::{BatchCaptureItem, CaptureInput};
use hookwell_shared::{now_ms, MockResponse};

use crate::error::{capture_status, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub slug: String,
    #[serde(flatten)]
    pub input: CaptureInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponse {
    pub success: bool,
    pub mock_response: MockResponse,
}

/// `POST /v1/capture` — persist one validated webhook request.
pub async fn capture(
    State(state): State<AppState>,
    Json(body): Json<CaptureRequest>,
) -> ApiResult<Json<CaptureResponse>> {
    validate_single(&body.slug, &body.input)?;
    let outcome = state.pipeline.capture(&body.slug, body.input).await?;
    Ok(Json(CaptureResponse {
        success: true,
        mock_response: outcome.mock_response,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CaptureBatchRequest {
    pub slug: String,
    pub requests: Vec<BatchCaptureItem>,
}

#[derive(Debug, Serialize)]
pub struct CaptureBatchResponse {
    pub success: bool,
    pub inserted: usize,
}

/// `POST /v1/capture-batch` — persist a receiver-buffered batch atomically.
/// Batch errors are all-or-nothing, so the error body reports `inserted: 0`.
pub async fn capture_batch(
    State(state): State<AppState>,
    Json(body): Json<CaptureBatchRequest>,
) -> Response {
    let result = validate_batch(&body.slug, &body.requests, now_ms());
    let result = match result {
        Ok(()) => state.pipeline.capture_batch(&body.slug, &body.requests).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(inserted) => Json(CaptureBatchResponse {
            success: true,
            inserted,
        })
        .into_response(),
        Err(err) => {
            let status = capture_status(&err);
            (status, Json(json!({"error": err.code(), "inserted": 0}))).into_response()
        }
    }
}
