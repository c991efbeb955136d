//! Quota routes: oracle reads and period activation

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use hookwell_capture::validate::validate_slug;
use hookwell_capture::{PeriodCheck, QuotaSnapshot};
use hookwell_shared::now_ms;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SlugQuery {
    pub slug: String,
}

/// `GET /v1/quota?slug=` — pure quota read for admission decisions.
pub async fn get_quota(
    State(state): State<AppState>,
    Query(query): Query<SlugQuery>,
) -> ApiResult<Json<QuotaSnapshot>> {
    validate_slug(&query.slug)?;
    let snapshot = state.oracle.get_quota(&query.slug, now_ms()).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPeriodRequest {
    pub user_id: Uuid,
}

/// `POST /v1/check-period` — gate for free users flagged with
/// `needsPeriodStart`; lazily starts a fresh quota period.
pub async fn check_period(
    State(state): State<AppState>,
    Json(body): Json<CheckPeriodRequest>,
) -> ApiResult<Json<PeriodCheck>> {
    let check = state.activator.check_and_start_period(body.user_id).await?;
    Ok(Json(check))
}
