//! Wanted-item endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sublarr_core::store::{WantedFilter, WantedUpsert};
use sublarr_core::{JobFilter, JobKind, JobState, MediaKind, SubtitleType, WantedItem, WantedStatus};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WantedQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `GET /wanted`
pub async fn list_wanted(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WantedQuery>,
) -> Result<Json<Vec<WantedItem>>, ApiError> {
    let mut filter = WantedFilter::new();
    if let Some(raw) = &query.status {
        let parsed = WantedStatus::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("unknown wanted status '{raw}'")))?;
        filter = filter.with_status(parsed);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit.clamp(1, 1000));
    }
    Ok(Json(state.wanted_store().list(&filter)?))
}

#[derive(Debug, Deserialize)]
pub struct CreateWantedBody {
    pub file_path: String,
    pub target_language: String,
    #[serde(default)]
    pub subtitle_type: Option<SubtitleType>,
}

/// `POST /wanted` — manually register a gap.
pub async fn create_wanted(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWantedBody>,
) -> Result<Json<WantedItem>, ApiError> {
    if body.file_path.is_empty() {
        return Err(ApiError::bad_request("file_path is required"));
    }
    let item = state.wanted_store().upsert(&WantedUpsert {
        kind: MediaKind::Episode,
        series_id: None,
        episode_id: None,
        file_path: body.file_path,
        target_language: body.target_language,
        subtitle_type: body.subtitle_type.unwrap_or(SubtitleType::Normal),
        status: WantedStatus::Wanted,
    })?;
    Ok(Json(item))
}

/// `POST /wanted/{id}/search` — enqueue a search job for one item.
pub async fn search_wanted(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let item = state
        .wanted_store()
        .get(id)?
        .ok_or_else(|| ApiError::not_found(format!("wanted item {id}")))?;
    let job = state
        .jobs()
        .enqueue_wanted_search(&item)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(serde_json::json!({ "job_id": job.id })))
}

#[derive(Debug, Deserialize)]
pub struct ProcessBody {
    #[serde(default)]
    pub ignore: Option<bool>,
}

/// `POST /wanted/{id}/process` — operator actions on a row (clear/ignore).
pub async fn process_wanted(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<ProcessBody>,
) -> Result<Json<WantedItem>, ApiError> {
    let target = if body.ignore.unwrap_or(false) {
        WantedStatus::Ignored
    } else {
        WantedStatus::Wanted
    };
    Ok(Json(state.wanted_store().set_status(id, target)?))
}

/// `POST /wanted/batch-search` — enqueue everything whose cooldown elapsed.
pub async fn batch_search(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.scheduler().run_batch_search().await;
    Ok(Json(serde_json::json!({ "started": true })))
}

#[derive(Debug, Serialize)]
pub struct BatchSearchStatus {
    pub queued: i64,
    pub running: i64,
    pub searching_items: usize,
}

/// `GET /wanted/batch-search/status`
pub async fn batch_search_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BatchSearchStatus>, ApiError> {
    let queued = state.job_store().count(
        &JobFilter::new()
            .with_state(JobState::Queued)
            .with_kind(JobKind::WantedSearch),
    )?;
    let running = state.job_store().count(
        &JobFilter::new()
            .with_state(JobState::Running)
            .with_kind(JobKind::WantedSearch),
    )?;
    let searching_items = state
        .wanted_store()
        .list(&WantedFilter::new().with_status(WantedStatus::Searching))?
        .len();
    Ok(Json(BatchSearchStatus {
        queued,
        running,
        searching_items,
    }))
}

/// `POST /wanted/refresh` — run a full reconcile now.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = state
        .reconciler()
        .reconcile(true)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "scanned": summary.scanned,
        "added": summary.added,
        "satisfied": summary.satisfied,
    })))
}
