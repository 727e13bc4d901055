//! Speech-to-text sub-stage.
//!
//! A single-worker queue (the GPU owns one transcription at a time) that
//! extracts the primary audio track to a temp WAV, runs a transcription
//! backend, and returns a source-language SRT for downstream translation.

mod backends;
mod queue;
mod types;

pub use backends::{HttpTranscriptionBackend, WhisperCliBackend};
pub use queue::{TranscribeQueue, TranscribeQueueConfig};
pub use types::*;
