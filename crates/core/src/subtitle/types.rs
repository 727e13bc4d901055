//! Shared types for the subtitle codec.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Subtitle container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleFormat {
    Ass,
    Ssa,
    Srt,
    Vtt,
    Unknown,
}

impl SubtitleFormat {
    /// Detect the format from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "ass" => Self::Ass,
            "ssa" => Self::Ssa,
            "srt" => Self::Srt,
            "vtt" => Self::Vtt,
            _ => Self::Unknown,
        }
    }

    /// The canonical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ass => "ass",
            Self::Ssa => "ssa",
            Self::Srt => "srt",
            Self::Vtt => "vtt",
            Self::Unknown => "sub",
        }
    }

    /// True for the styled SubStation family.
    pub fn is_styled(&self) -> bool {
        matches!(self, Self::Ass | Self::Ssa)
    }
}

impl std::fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Errors from parsing or serializing subtitle files.
#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("missing [{0}] section")]
    MissingSection(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("line count mismatch: expected {expected}, got {actual}")]
    LineCountMismatch { expected: usize, actual: usize },
}

/// A single SRT cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtCue {
    pub index: u32,
    /// Start time in milliseconds.
    pub start_ms: u64,
    /// End time in milliseconds.
    pub end_ms: u64,
    /// Cue text, lines joined with `\n`.
    pub text: String,
}

/// Kind of an ASS event line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssEventKind {
    Dialogue,
    Comment,
}

impl AssEventKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Dialogue => "Dialogue",
            Self::Comment => "Comment",
        }
    }
}

/// One event from the `[Events]` section.
///
/// Only the fields the pipeline touches are decoded; the remaining columns
/// are kept verbatim so serialization reproduces the source line.
#[derive(Debug, Clone, PartialEq)]
pub struct AssEvent {
    pub kind: AssEventKind,
    /// Start time in centiseconds.
    pub start_cs: u64,
    /// End time in centiseconds.
    pub end_cs: u64,
    /// Style name this event renders with.
    pub style: String,
    /// Event text with inline `{\...}` override runs and `\N` breaks.
    pub text: String,
    /// Raw values of all other columns, keyed by declared field order.
    pub extra: Vec<(String, String)>,
}

/// A style declaration from `[V4+ Styles]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssStyle {
    pub name: String,
    /// Remaining column values, in declared order.
    pub fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SubtitleFormat::from_extension("ass"), SubtitleFormat::Ass);
        assert_eq!(SubtitleFormat::from_extension("ASS"), SubtitleFormat::Ass);
        assert_eq!(SubtitleFormat::from_extension("srt"), SubtitleFormat::Srt);
        assert_eq!(SubtitleFormat::from_extension("ssa"), SubtitleFormat::Ssa);
        assert_eq!(SubtitleFormat::from_extension("vtt"), SubtitleFormat::Vtt);
        assert_eq!(
            SubtitleFormat::from_extension("txt"),
            SubtitleFormat::Unknown
        );
    }

    #[test]
    fn test_format_roundtrip_extension() {
        for fmt in [
            SubtitleFormat::Ass,
            SubtitleFormat::Ssa,
            SubtitleFormat::Srt,
            SubtitleFormat::Vtt,
        ] {
            assert_eq!(SubtitleFormat::from_extension(fmt.extension()), fmt);
        }
    }

    #[test]
    fn test_styled_family() {
        assert!(SubtitleFormat::Ass.is_styled());
        assert!(SubtitleFormat::Ssa.is_styled());
        assert!(!SubtitleFormat::Srt.is_styled());
        assert!(!SubtitleFormat::Vtt.is_styled());
    }

    #[test]
    fn test_format_serde() {
        assert_eq!(
            serde_json::to_string(&SubtitleFormat::Ass).unwrap(),
            "\"ass\""
        );
        let parsed: SubtitleFormat = serde_json::from_str("\"srt\"").unwrap();
        assert_eq!(parsed, SubtitleFormat::Srt);
    }
}
