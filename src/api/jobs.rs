//! Job submission and query endpoints

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::types::{Job, JobState, SourceChannel};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    /// Ingress channel tag: "api" (default) or "bot"
    channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub state: JobState,
    /// True when an identical submission was already in flight
    pub deduplicated: bool,
}

/// POST /jobs
///
/// Raw media bytes in the body. Classifies, dedups, and enqueues; 202 for a
/// new job, 200 when resolved to an existing in-flight one.
pub async fn submit_job(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty request body".to_string()));
    }

    let channel = match params.channel.as_deref() {
        None => SourceChannel::Api,
        Some(s) => SourceChannel::parse(s)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown channel: {s}")))?,
    };

    let classified = classifier::classify(&body)?;

    let outcome = db::jobs::submit_or_reuse(
        &state.db,
        &classified.content_hash,
        classified.kind,
        channel,
        &body,
    )
    .await?;

    if outcome.deduplicated {
        state.metrics.record_deduplicated(classified.kind);
    } else {
        state.metrics.record_submitted(classified.kind);
    }

    let job = db::jobs::get(&state.db, outcome.job_id).await?;
    let status = if outcome.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status,
        Json(SubmitResponse {
            job_id: outcome.job_id,
            state: job.state,
            deduplicated: outcome.deduplicated,
        }),
    ))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    let job = db::jobs::get(&state.db, id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    state: Option<String>,
    limit: Option<i64>,
}

/// GET /jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Job>>> {
    let filter = params
        .state
        .as_deref()
        .map(|s| {
            JobState::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown state: {s}")))
        })
        .transpose()?;

    let limit = params.limit.unwrap_or(50).clamp(1, 100);

    let jobs = db::jobs::list_recent(&state.db, filter, limit).await?;
    Ok(Json(jobs))
}

/// Build job routes
pub fn jobs_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
}
