//! Shared application state

use sqlx::PgPool;
use std::sync::Arc;

use hookwell_capture::{AccountDeleter, CapturePipeline, PeriodActivator, QuotaOracle};

use crate::config::Config;

/// State threaded through every handler. Services are cheap clones around
/// the shared pool.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub oracle: QuotaOracle,
    pub activator: PeriodActivator,
    pub pipeline: CapturePipeline,
    pub deleter: AccountDeleter,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> Self {
        Self {
            config: Arc::new(config),
            oracle: QuotaOracle::new(pool.clone()),
            activator: PeriodActivator::new(pool.clone()),
            pipeline: CapturePipeline::new(pool.clone()),
            deleter: AccountDeleter::new(pool.clone()),
            pool,
        }
    }
}
