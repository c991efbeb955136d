//! Endpoint metadata for the receiver's cache

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use hookwell_capture::validate::validate_slug;
use hookwell_capture::CaptureError;
use hookwell_shared::{Endpoint, MockResponse};

use crate::error::ApiResult;
use crate::routes::quota::SlugQuery;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfoResponse {
    pub endpoint_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub is_ephemeral: bool,
    pub expires_at: Option<i64>,
    pub mock_response: Option<MockResponse>,
}

/// `GET /v1/endpoint-info?slug=` — resolve an endpoint for the receiver.
/// Expired endpoints still resolve here; expiry is enforced on capture.
pub async fn endpoint_info(
    State(state): State<AppState>,
    Query(query): Query<SlugQuery>,
) -> ApiResult<Json<EndpointInfoResponse>> {
    validate_slug(&query.slug)?;

    let endpoint: Option<Endpoint> =
        sqlx::query_as("SELECT * FROM endpoints WHERE slug = $1")
            .bind(&query.slug)
            .fetch_optional(&state.pool)
            .await?;

    let Some(endpoint) = endpoint else {
        return Err(CaptureError::NotFound.into());
    };

    Ok(Json(EndpointInfoResponse {
        endpoint_id: endpoint.id,
        owner_id: endpoint.user_id,
        is_ephemeral: endpoint.is_ephemeral,
        expires_at: endpoint.expires_at,
        mock_response: endpoint.mock().map(MockResponse::sanitized),
    }))
}
