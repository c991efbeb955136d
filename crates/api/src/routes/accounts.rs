//! Account lifecycle boundary

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    pub user_id: Uuid,
}

/// `POST /v1/accounts/delete` — fire-and-forget kick-off of the phased
/// deletion orchestrator. Returns as soon as the first phase is enqueued.
pub async fn delete_account(
    State(state): State<AppState>,
    Json(body): Json<DeleteAccountRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state.deleter.start(body.user_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"accepted": true}))))
}
