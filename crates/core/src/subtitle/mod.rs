//! Subtitle parsing, serialization and text manipulation.
//!
//! Handles the two on-disk formats the pipeline produces (ASS and SRT),
//! classification of ASS styles into dialog vs signs/songs, and extraction
//! and restoration of inline override tags around translated text.

mod ass;
mod classify;
mod srt;
mod tags;
mod types;

pub use ass::AssFile;
pub use classify::{classify_styles, StyleClass};
pub use srt::SrtFile;
pub use tags::{extract_tags, restore_tags, TagSpan};
pub use types::*;
