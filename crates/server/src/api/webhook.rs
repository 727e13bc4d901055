//! Inbound library-manager webhooks.
//!
//! Fire-and-forget pings from an upstream manager ("file imported"). The
//! core delays processing so the upstream finishes its own post-processing
//! before we probe the file.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use sublarr_core::Event;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    #[serde(default, alias = "eventType", alias = "event_type")]
    pub event: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub series_id: Option<i64>,
}

/// `POST /webhook/{source}` — always 200, processing happens later.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    Json(body): Json<WebhookBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = body.event.clone().unwrap_or_else(|| "unknown".to_string());
    info!(source = %source, kind = %kind, "webhook received");
    state.events().publish(Event::WebhookReceived {
        source: source.clone(),
        kind: kind.clone(),
    });

    let delay = Duration::from_secs(
        state.config().effective().server.webhook_delay_minutes * 60,
    );
    let file_path = body.file_path.clone();
    let state_for_task = Arc::clone(&state);
    tokio::spawn(async move {
        // Let the upstream finish renaming/moving before we look.
        tokio::time::sleep(delay).await;
        match file_path {
            Some(path) if !path.is_empty() => {
                let config = state_for_task.config().effective();
                let language = config
                    .media
                    .languages
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "en".to_string());
                match state_for_task
                    .jobs()
                    .enqueue_translate(&path, &language, false)
                    .await
                {
                    Ok(job) => debug!(job_id = %job.id, "webhook-triggered job enqueued"),
                    Err(e) => warn!(error = %e, "webhook-triggered enqueue failed"),
                }
            }
            _ => {
                // No path: fall back to an incremental reconcile.
                if let Err(e) = state_for_task.reconciler().reconcile(false).await {
                    warn!(error = %e, "webhook-triggered reconcile failed");
                }
            }
        }
    });

    Ok(Json(serde_json::json!({ "accepted": true })))
}
