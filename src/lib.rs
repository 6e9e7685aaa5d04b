//! mediatext - asynchronous multi-modal recognition service
//!
//! Accepts media submissions from the HTTP and bot ingress channels,
//! classifies them, and converts them to text through the matching
//! recognition engine under bounded per-kind concurrency with retries,
//! idempotent deduplication, and transactional result commits.

pub mod api;
pub mod classifier;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod engines;
pub mod error;
pub mod metrics;
pub mod types;

pub use crate::error::{ApiError, ApiResult, Error, Result};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::metrics::Metrics;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Metrics sink shared with the dispatcher
    pub metrics: Arc<Metrics>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, metrics: Arc<Metrics>) -> Self {
        Self {
            db,
            metrics,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::jobs_routes())
        .merge(api::health_routes())
        .merge(api::metrics_routes())
        .with_state(state)
}
