//! Shared types and database utilities for Hookwell.

pub mod db;
pub mod types;

pub use types::{now_ms, CapturedRequest, Endpoint, MockResponse, Plan, User};
