//! Config endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use sublarr_core::config::sanitize;

use super::error::ApiError;
use crate::state::AppState;

/// `GET /config` — effective config with secrets masked.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(sanitize(&state.config().effective()))
}

/// `PUT /config` — persist runtime overrides (opaque dotted keys) and
/// invalidate dependent caches.
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(entries): Json<HashMap<String, serde_json::Value>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if entries.is_empty() {
        return Err(ApiError::bad_request("no config entries provided"));
    }
    for (key, value) in &entries {
        let raw = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        state
            .config()
            .set_override(key, &raw)
            .map_err(ApiError::from)?;
    }

    // Anything keyed by config fingerprint re-resolves on next use.
    state.providers().invalidate_weights();

    Ok(Json(serde_json::json!({
        "updated": entries.len(),
        "fingerprint": state.config().fingerprint(),
    })))
}
