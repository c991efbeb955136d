//! Route registration

pub mod accounts;
pub mod capture;
pub mod endpoints;
pub mod health;
pub mod quota;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::require_shared_secret;
use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let receiver_routes = Router::new()
        .route("/quota", get(quota::get_quota))
        .route("/check-period", post(quota::check_period))
        .route("/endpoint-info", get(endpoints::endpoint_info))
        .route("/capture", post(capture::capture))
        .route("/capture-batch", post(capture::capture_batch))
        .route("/accounts/delete", post(accounts::delete_account))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_shared_secret,
        ));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", receiver_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
