//! Pipeline request/outcome types.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::JobPhase;
use crate::provider::{ProviderError, VideoQuery};
use crate::store::{ArtifactSource, StoreError, SubtitleType};
use crate::subtitle::SubtitleError;
use crate::translate::TranslateError;

/// A single acquisition request.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub video_path: PathBuf,
    pub target_language: String,
    pub subtitle_type: SubtitleType,
    /// Preferred source language for translation sources.
    pub source_language: String,
    /// Re-acquire even when a target artifact exists.
    pub force: bool,
    /// Enrichment from the library source, if known.
    pub query: Option<VideoQuery>,
    pub series_id: Option<i64>,
    /// Cooperative cancellation flag shared with the owning job.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl AcquireRequest {
    pub fn new(
        video_path: impl Into<PathBuf>,
        target_language: impl Into<String>,
        source_language: impl Into<String>,
    ) -> Self {
        Self {
            video_path: video_path.into(),
            target_language: target_language.into(),
            subtitle_type: SubtitleType::Normal,
            source_language: source_language.into(),
            force: false,
            query: None,
            series_id: None,
            cancel: None,
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(std::sync::atomic::Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Terminal outcome of an acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquireOutcome {
    /// The target already satisfies the request; disk untouched.
    Skipped { reason: String, path: Option<String> },
    /// An artifact was written.
    Acquired {
        source: ArtifactSource,
        path: String,
        provider: Option<String>,
        score: Option<u32>,
    },
    Failed {
        code: String,
        reason: String,
    },
}

impl AcquireOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn output_path(&self) -> Option<&str> {
        match self {
            Self::Acquired { path, .. } => Some(path),
            Self::Skipped { path, .. } => path.as_deref(),
            Self::Failed { .. } => None,
        }
    }
}

/// Progress callback: (fraction, phase).
pub type ProgressFn = Arc<dyn Fn(f32, JobPhase) + Send + Sync>;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no source available for {path} ({language})")]
    NoSourceAvailable { path: String, language: String },

    #[error("upgrade gate rejected: candidate {candidate} vs floor {floor}")]
    UpgradeGateRejected { candidate: u32, floor: u32 },

    #[error("acquisition cancelled")]
    Cancelled,

    #[error("path {0} escapes the media root")]
    PathOutsideMedia(PathBuf),

    #[error(transparent)]
    Subtitle(#[from] SubtitleError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transcription failed: {0}")]
    Transcribe(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable machine-readable code for the HTTP surface and job records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSourceAvailable { .. } => "PIPELINE_NO_SOURCE",
            Self::UpgradeGateRejected { .. } => "PIPELINE_UPGRADE_REJECTED",
            Self::Cancelled => "PIPELINE_CANCELLED",
            Self::PathOutsideMedia(_) => "FILE_PATH_OUTSIDE_MEDIA",
            Self::Subtitle(_) => "SUBTITLE_PARSE",
            Self::Provider(_) => "PROVIDER_FAILED",
            Self::Translate(TranslateError::LineCountMismatch { .. }) => {
                "TRANS_LINE_COUNT_MISMATCH"
            }
            Self::Translate(TranslateError::HallucinationDetected { .. }) => {
                "TRANS_HALLUCINATION"
            }
            Self::Translate(_) => "TRANS_FAILED",
            Self::Store(_) => "STORE_FAILED",
            Self::Transcribe(_) => "TRANSCRIBE_FAILED",
            Self::Io(_) => "FILE_IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let skipped = AcquireOutcome::Skipped {
            reason: "target exists".into(),
            path: Some("/m/a.de.ass".into()),
        };
        assert!(skipped.is_success());
        assert_eq!(skipped.output_path(), Some("/m/a.de.ass"));

        let failed = AcquireOutcome::Failed {
            code: "PIPELINE_NO_SOURCE".into(),
            reason: "nothing".into(),
        };
        assert!(!failed.is_success());
        assert!(failed.output_path().is_none());
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            PipelineError::NoSourceAvailable {
                path: "x".into(),
                language: "de".into()
            }
            .code(),
            "PIPELINE_NO_SOURCE"
        );
        assert_eq!(
            PipelineError::Translate(TranslateError::LineCountMismatch {
                expected: 1,
                actual: 2
            })
            .code(),
            "TRANS_LINE_COUNT_MISMATCH"
        );
        assert_eq!(
            PipelineError::Translate(TranslateError::HallucinationDetected { line_index: 3 })
                .code(),
            "TRANS_HALLUCINATION"
        );
    }

    #[test]
    fn test_outcome_serde() {
        let outcome = AcquireOutcome::Acquired {
            source: ArtifactSource::Translated,
            path: "/m/a.de.ass".into(),
            provider: None,
            score: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"outcome\":\"acquired\""));
        assert!(json.contains("\"source\":\"translated\""));
    }
}
