//! Metrics snapshot endpoint
//!
//! Counters and histograms come from the in-process sink; queue depth is a
//! live gauge read from the job store.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::db;
use crate::error::ApiResult;
use crate::metrics::MetricsSnapshot;
use crate::types::MediaKind;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct QueueDepth {
    pub image: i64,
    pub audio: i64,
}

#[derive(Debug, Serialize)]
pub struct MetricsReport {
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
    pub queue_depth: QueueDepth,
}

/// GET /metrics
pub async fn metrics_report(State(state): State<AppState>) -> ApiResult<Json<MetricsReport>> {
    let queue_depth = QueueDepth {
        image: db::jobs::queue_depth(&state.db, MediaKind::Image).await?,
        audio: db::jobs::queue_depth(&state.db, MediaKind::Audio).await?,
    };

    Ok(Json(MetricsReport {
        counters: state.metrics.snapshot(),
        queue_depth,
    }))
}

/// Build metrics routes
pub fn metrics_routes() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_report))
}
