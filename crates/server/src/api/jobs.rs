//! Job listing, status and cancellation.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use sublarr_core::{Job, JobFilter, JobState};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `GET /jobs`
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let mut filter = JobFilter::new();
    if let Some(raw) = &query.state {
        let parsed = JobState::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("unknown job state '{raw}'")))?;
        filter = filter.with_state(parsed);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit.clamp(1, 1000));
    }
    Ok(Json(state.job_store().list(&filter)?))
}

/// `GET /status/{id}`
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .job_store()
        .get(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {id}")))
}

/// `POST /jobs/{id}/cancel`
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.jobs().cancel(&id).await.map_err(|e| match e {
        sublarr_core::JobError::NotFound(what) => ApiError::not_found(what),
        sublarr_core::JobError::Store(e) => ApiError::from(e),
        other => ApiError::bad_request(other.to_string()),
    })?;
    Ok(Json(serde_json::json!({ "cancelled": id })))
}
