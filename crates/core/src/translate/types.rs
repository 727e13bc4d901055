//! Types for the translation engine.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::glossary::Glossary;

/// A translation request, as issued by the acquisition pipeline.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    /// Plain-text lines; inline tags already stripped, `\N` rendered as `\n`.
    pub lines: Vec<String>,
    pub source_language: String,
    pub target_language: String,
    pub glossary: Option<Glossary>,
    pub style_hints: Option<String>,
    pub series_id: Option<i64>,
    pub preferred_backend: Option<String>,
    pub fallback_chain: Option<Vec<String>>,
    /// Cooperative cancellation, observed between chunks.
    pub cancel: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
}

impl TranslationRequest {
    pub fn new(
        lines: Vec<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            lines,
            source_language: source_language.into(),
            target_language: target_language.into(),
            glossary: None,
            style_hints: None,
            series_id: None,
            preferred_backend: None,
            fallback_chain: None,
            cancel: None,
        }
    }
}

/// Result of a translation. `translated_lines.len()` always equals the
/// request's line count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub translated_lines: Vec<String>,
    pub backend_used: String,
    pub per_line_scores: Option<Vec<f32>>,
}

/// One chunk handed to a backend.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub lines: Vec<String>,
    pub source_language: String,
    pub target_language: String,
    /// Resolved glossary pairs, series overrides already applied.
    pub glossary: Vec<(String, String)>,
    pub style_hints: Option<String>,
}

/// Errors from the translation layer.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("backend {0} is unavailable")]
    BackendUnavailable(String),

    #[error("backend {backend} timed out after {timeout:?}")]
    BackendTimeout {
        backend: String,
        timeout: Duration,
    },

    #[error("backend {0} rejected the credentials")]
    BackendAuthInvalid(String),

    #[error("line count mismatch: expected {expected}, got {actual}")]
    LineCountMismatch { expected: usize, actual: usize },

    #[error("hallucinated output on line {line_index}")]
    HallucinationDetected { line_index: usize },

    #[error("backend {backend} transient error: {message}")]
    Transient { backend: String, message: String },

    #[error("no usable backend for {src_lang} -> {target}")]
    NoBackend { src_lang: String, target: String },

    #[error("translation cancelled")]
    Cancelled,
}

impl TranslateError {
    /// Transient errors move on to the next backend in the chain.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_)
                | Self::BackendTimeout { .. }
                | Self::Transient { .. }
        )
    }
}

/// A translation backend.
///
/// Backends translate exactly the lines given; chunking, retries, repair and
/// validation belong to the engine.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backend accepts multi-line batches.
    fn supports_batch(&self) -> bool;

    /// Largest chunk the backend accepts.
    fn max_batch_size(&self) -> usize;

    /// Language pairs the backend serves; `None` means unrestricted.
    fn supported_pairs(&self) -> Option<HashSet<(String, String)>> {
        None
    }

    async fn translate_batch(&self, batch: &BatchRequest)
        -> Result<Vec<String>, TranslateError>;

    async fn health_check(&self) -> Result<(), TranslateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TranslateError::BackendUnavailable("x".into()).is_transient());
        assert!(TranslateError::BackendTimeout {
            backend: "x".into(),
            timeout: Duration::from_secs(90)
        }
        .is_transient());
        assert!(!TranslateError::BackendAuthInvalid("x".into()).is_transient());
        assert!(!TranslateError::LineCountMismatch {
            expected: 3,
            actual: 4
        }
        .is_transient());
        assert!(!TranslateError::HallucinationDetected { line_index: 0 }.is_transient());
    }

    #[test]
    fn test_request_builder_defaults() {
        let request = TranslationRequest::new(vec!["hi".into()], "en", "de");
        assert!(request.preferred_backend.is_none());
        assert!(request.glossary.is_none());
        assert_eq!(request.lines.len(), 1);
    }
}
