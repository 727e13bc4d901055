//! Provider endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sublarr_core::{ScoredResult, VideoQuery};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub languages: Vec<String>,
    pub priority: u8,
    pub breaker_state: String,
    pub consecutive_failures: u32,
}

/// `GET /providers`
pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderInfo>> {
    let engine = state.providers();
    let infos = engine
        .providers()
        .iter()
        .map(|provider| {
            let breaker = engine.breaker(provider.name());
            ProviderInfo {
                name: provider.name().to_string(),
                languages: provider.languages(),
                priority: provider.priority(),
                breaker_state: breaker
                    .map(|b| b.state().as_str().to_string())
                    .unwrap_or_else(|| "closed".to_string()),
                consecutive_failures: breaker.map(|b| b.consecutive_failures()).unwrap_or(0),
            }
        })
        .collect();
    Json(infos)
}

/// `POST /providers/test/{name}` — run the provider's health check.
pub async fn test_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.providers().test_provider(&name).await?;
    Ok(Json(serde_json::json!({ "provider": name, "ok": true })))
}

/// `POST /providers/{name}/reset` — close the breaker, clear auto-disable.
pub async fn reset_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.providers().provider(&name).is_none() {
        return Err(ApiError::not_found(format!("provider {name}")));
    }
    state.providers().reset_provider(&name);
    Ok(Json(serde_json::json!({ "provider": name, "reset": true })))
}

#[derive(Debug, Deserialize)]
pub struct ManualSearchBody {
    pub file_path: String,
    #[serde(default)]
    pub languages: Vec<String>,
}

/// `POST /providers/search` — manual search without downloading.
pub async fn manual_search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ManualSearchBody>,
) -> Result<Json<Vec<ScoredResult>>, ApiError> {
    if body.file_path.is_empty() {
        return Err(ApiError::bad_request("file_path is required"));
    }
    let config = state.config().effective();
    let languages = if body.languages.is_empty() {
        config.media.languages.clone()
    } else {
        body.languages
    };

    let query = VideoQuery::new(body.file_path, languages);
    let fingerprint = state.config().fingerprint();
    let results = state
        .providers()
        .search(&query, &fingerprint, move || {
            (config.scoring.episode.clone(), config.scoring.movie.clone())
        })
        .await;
    Ok(Json(results))
}
