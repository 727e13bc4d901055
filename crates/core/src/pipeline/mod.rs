//! The acquisition pipeline.
//!
//! Maps "video X needs subtitle Y" to an artifact on disk through the
//! three-case decision: skip when a styled target exists, upgrade an existing
//! SRT, otherwise acquire by translation, provider download or transcription.

mod acquisition;
mod doc;
mod extract;
mod types;
mod writer;

pub use acquisition::{AcquisitionPipeline, PipelineConfig, WeightSource};
pub(crate) use acquisition::parse_media_name;
pub use doc::{translate_ass, translate_srt};
pub use extract::extract_embedded_subtitle;
pub use types::*;
pub use writer::{atomic_write, ensure_within_root};
