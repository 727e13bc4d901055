//! Translate endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use sublarr_core::{AcquireOutcome, AcquireRequest};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TranslateBody {
    pub file_path: String,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct JobCreated {
    pub job_id: String,
}

fn resolve_language(state: &AppState, requested: Option<String>) -> String {
    requested.unwrap_or_else(|| {
        state
            .config()
            .effective()
            .media
            .languages
            .first()
            .cloned()
            .unwrap_or_else(|| "en".to_string())
    })
}

/// `POST /translate` — enqueue and return the job id.
pub async fn translate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TranslateBody>,
) -> Result<Json<JobCreated>, ApiError> {
    if body.file_path.is_empty() {
        return Err(ApiError::bad_request("file_path is required"));
    }
    let language = resolve_language(&state, body.target_language);
    let job = state
        .jobs()
        .enqueue_translate(&body.file_path, &language, body.force)
        .await
        .map_err(|e| match e {
            sublarr_core::JobError::Store(e) => ApiError::from(e),
            other => ApiError::bad_request(other.to_string()),
        })?;
    Ok(Json(JobCreated { job_id: job.id }))
}

/// `POST /translate/sync` — run the acquisition inline and block until done.
pub async fn translate_sync(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TranslateBody>,
) -> Result<Json<AcquireOutcome>, ApiError> {
    if body.file_path.is_empty() {
        return Err(ApiError::bad_request("file_path is required"));
    }
    let config = state.config().effective();
    let language = resolve_language(&state, body.target_language);

    let mut request = AcquireRequest::new(
        body.file_path.clone(),
        language,
        config.media.source_language.clone(),
    );
    request.force = body.force;

    let outcome = state.pipeline().acquire(request, None).await;
    Ok(Json(outcome))
}
