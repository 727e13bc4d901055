//! Types for the transcription lane.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Queue priority; lower values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TranscribePriority {
    Manual = 1,
    Wanted = 5,
    Batch = 10,
}

/// Errors from the transcription lane.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("no transcription backend available")]
    NotAvailable,

    #[error("audio extraction failed: {0}")]
    AudioExtraction(String),

    #[error("transcription backend failed: {0}")]
    Backend(String),

    #[error("transcription timed out")]
    Timeout,

    #[error("transcription queue is shut down")]
    QueueClosed,
}

/// Output of a transcription run.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// SRT content in the source language.
    pub srt: String,
    /// Per-cue confidence in `[0, 1]` when the backend reports it.
    pub confidences: Option<Vec<f32>>,
}

/// A transcription backend. Receives a mono 16 kHz WAV.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcribe(&self, wav: &Path, language: &str)
        -> Result<Transcript, TranscribeError>;

    async fn is_available(&self) -> bool;
}

/// Retry hook for low-confidence lines (an LLM pass in production setups).
#[async_trait]
pub trait TranscriptRefiner: Send + Sync {
    /// Return a corrected line, or `None` to keep the original.
    async fn refine_line(&self, text: &str, language: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(TranscribePriority::Manual < TranscribePriority::Wanted);
        assert!(TranscribePriority::Wanted < TranscribePriority::Batch);
    }
}
