//! Embedded-stream probing of media files.
//!
//! A probe enumerates every stream of a container (video, audio, subtitle)
//! in one external-tool invocation and normalizes the result, so language
//! checks against audio tracks keep working no matter which engine runs.
//! Results are cached by (path, mtime) with at-most-one probe in flight per
//! key.

mod cache;
mod ffprobe;
mod mediainfo;
mod types;

pub use cache::{ProbeCacheRepo, ProbeService};
pub use ffprobe::FfprobeProber;
pub use mediainfo::MediaInfoProber;
pub use types::*;
