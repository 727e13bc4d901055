//! Health and metrics endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sublarr_core::{JobFilter, JobState};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// `GET /health` — liveness only, unauthenticated.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct DetailedHealth {
    pub status: String,
    pub database_ok: bool,
    pub queued_jobs: i64,
    pub running_jobs: i64,
    pub providers: Vec<ProviderHealth>,
    pub backends: Vec<BackendHealth>,
    pub transcriber_queue_depth: Option<usize>,
}

#[derive(Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub breaker_state: String,
    pub consecutive_failures: u32,
}

#[derive(Serialize)]
pub struct BackendHealth {
    pub name: String,
}

/// `GET /health/detailed`
pub async fn health_detailed(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DetailedHealth>, ApiError> {
    let database_ok = state.db().integrity_ok().unwrap_or(false);
    let queued_jobs = state
        .job_store()
        .count(&JobFilter::new().with_state(JobState::Queued))?;
    let running_jobs = state
        .job_store()
        .count(&JobFilter::new().with_state(JobState::Running))?;

    let providers = state
        .providers()
        .providers()
        .iter()
        .map(|p| {
            let breaker = state.providers().breaker(p.name());
            ProviderHealth {
                name: p.name().to_string(),
                breaker_state: breaker
                    .map(|b| b.state().as_str().to_string())
                    .unwrap_or_else(|| "closed".to_string()),
                consecutive_failures: breaker.map(|b| b.consecutive_failures()).unwrap_or(0),
            }
        })
        .collect();
    let backends = state
        .translator()
        .backends()
        .iter()
        .map(|b| BackendHealth {
            name: b.name().to_string(),
        })
        .collect();

    let transcriber_queue_depth = match state.transcriber() {
        Some(queue) => Some(queue.depth().await),
        None => None,
    };

    let status = if database_ok { "ok" } else { "degraded" };
    Ok(Json(DetailedHealth {
        status: status.to_string(),
        database_ok,
        queued_jobs,
        running_jobs,
        providers,
        backends,
        transcriber_queue_depth,
    }))
}

/// `GET /metrics` — Prometheus text exposition, unauthenticated.
pub async fn metrics() -> String {
    crate::metrics::encode_metrics()
}
