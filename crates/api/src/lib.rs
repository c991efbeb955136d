//! Hookwell API Library
//!
//! The receiver-facing boundary: quota reads, period activation, capture
//! ingestion, and account deletion, all behind a shared-secret check.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
