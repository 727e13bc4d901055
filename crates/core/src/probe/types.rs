//! Types for the media probe.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stream kind inside a media container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

/// Stream dispositions relevant to subtitle selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disposition {
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub default: bool,
}

/// One normalized stream record.
///
/// Both probe engines produce exactly this shape, so cached entries are
/// engine-independent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaStream {
    /// Container stream index.
    pub index: u32,
    pub kind: StreamKind,
    /// Codec identifier, lowercased (e.g. `ass`, `subrip`, `hdmv_pgs_subtitle`).
    pub codec_name: String,
    /// ISO 639 language tag as declared, lowercased, if any.
    pub language: Option<String>,
    /// Stream title, if any.
    pub title: Option<String>,
    #[serde(default)]
    pub disposition: Disposition,
}

impl MediaStream {
    /// True for a text subtitle stream the pipeline can extract.
    pub fn is_text_subtitle(&self) -> bool {
        self.kind == StreamKind::Subtitle
            && matches!(self.codec_name.as_str(), "ass" | "ssa" | "subrip" | "srt" | "mov_text" | "webvtt")
    }

    /// True when the stream language matches `lang` (two-letter comparison,
    /// tolerating three-letter container tags like `eng`/`ger`).
    pub fn language_matches(&self, lang: &str) -> bool {
        match &self.language {
            Some(tag) => {
                let tag = tag.to_ascii_lowercase();
                let lang = lang.to_ascii_lowercase();
                tag == lang || crate::probe::normalize_lang(&tag) == lang
            }
            None => false,
        }
    }
}

/// Map common ISO 639-2 tags to their 639-1 form.
pub fn normalize_lang(tag: &str) -> &str {
    match tag {
        "eng" => "en",
        "ger" | "deu" => "de",
        "fre" | "fra" => "fr",
        "spa" => "es",
        "ita" => "it",
        "jpn" => "ja",
        "chi" | "zho" => "zh",
        "kor" => "ko",
        "por" => "pt",
        "rus" => "ru",
        "dut" | "nld" => "nl",
        "pol" => "pl",
        "swe" => "sv",
        "nor" => "no",
        "dan" => "da",
        "fin" => "fi",
        "hun" => "hu",
        "cze" | "ces" => "cs",
        "ara" => "ar",
        "tur" => "tr",
        other => other,
    }
}

/// Errors from probing a file.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: i32,
        stderr: String,
    },

    #[error("failed to parse {tool} output: {0}", tool = .1)]
    Parse(String, &'static str),

    #[error("probe timed out after {0} seconds")]
    Timeout(u64),
}

/// A probe engine.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Engine name for logging and config matching.
    fn engine(&self) -> &'static str;

    /// Enumerate all streams of the file. Must query every stream type in a
    /// single tool invocation.
    async fn probe(&self, path: &Path) -> Result<Vec<MediaStream>, ProbeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_matches() {
        let stream = MediaStream {
            index: 2,
            kind: StreamKind::Subtitle,
            codec_name: "ass".into(),
            language: Some("eng".into()),
            title: None,
            disposition: Disposition::default(),
        };
        assert!(stream.language_matches("en"));
        assert!(stream.language_matches("eng"));
        assert!(!stream.language_matches("de"));
    }

    #[test]
    fn test_language_missing_never_matches() {
        let stream = MediaStream {
            index: 0,
            kind: StreamKind::Audio,
            codec_name: "aac".into(),
            language: None,
            title: None,
            disposition: Disposition::default(),
        };
        assert!(!stream.language_matches("en"));
    }

    #[test]
    fn test_is_text_subtitle() {
        let mut stream = MediaStream {
            index: 2,
            kind: StreamKind::Subtitle,
            codec_name: "ass".into(),
            language: None,
            title: None,
            disposition: Disposition::default(),
        };
        assert!(stream.is_text_subtitle());
        stream.codec_name = "hdmv_pgs_subtitle".into();
        assert!(!stream.is_text_subtitle());
        stream.codec_name = "subrip".into();
        stream.kind = StreamKind::Audio;
        assert!(!stream.is_text_subtitle());
    }

    #[test]
    fn test_normalize_lang() {
        assert_eq!(normalize_lang("ger"), "de");
        assert_eq!(normalize_lang("deu"), "de");
        assert_eq!(normalize_lang("en"), "en");
        assert_eq!(normalize_lang("xx"), "xx");
    }

    #[test]
    fn test_stream_serde_roundtrip() {
        let stream = MediaStream {
            index: 3,
            kind: StreamKind::Subtitle,
            codec_name: "subrip".into(),
            language: Some("de".into()),
            title: Some("Full".into()),
            disposition: Disposition {
                forced: true,
                default: false,
            },
        };
        let json = serde_json::to_string(&stream).unwrap();
        let parsed: MediaStream = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, stream);
    }
}
