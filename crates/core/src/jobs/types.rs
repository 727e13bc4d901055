//! Job payloads and results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::SubtitleType;

/// Kind-specific job parameters, stored as the job row's JSON payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub subtitle_type: Option<SubtitleType>,
    /// For wanted-search jobs.
    #[serde(default)]
    pub wanted_id: Option<i64>,
    #[serde(default)]
    pub series_id: Option<i64>,
    /// For batch jobs.
    #[serde(default)]
    pub paths: Option<Vec<String>>,
}

impl JobPayload {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn decode(payload: Option<&str>) -> Self {
        payload
            .and_then(|p| serde_json::from_str(p).ok())
            .unwrap_or_default()
    }
}

/// Aggregate result of a batch job. All-skipped still counts as completed;
/// the split is preserved for callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    /// A batch fails only when every member failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0 || self.succeeded + self.skipped > 0
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("job {0} not found")]
    NotFound(String),

    #[error("queue is shutting down")]
    ShuttingDown,
}
