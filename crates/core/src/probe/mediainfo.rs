//! MediaInfo-based probe engine.
//!
//! Produces the same normalized records as the ffprobe engine, so a library
//! can switch engines without invalidating cached probes.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::types::{Disposition, MediaProber, MediaStream, ProbeError, StreamKind};

const TOOL: &str = "mediainfo";

/// Probe engine backed by the `mediainfo` binary (`--Output=JSON`).
pub struct MediaInfoProber {
    binary: String,
    timeout_secs: u64,
}

impl MediaInfoProber {
    pub fn new(binary: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs,
        }
    }
}

impl Default for MediaInfoProber {
    fn default() -> Self {
        Self::new(TOOL, 30)
    }
}

#[derive(Deserialize)]
struct MiOutput {
    media: Option<MiMedia>,
}

#[derive(Deserialize)]
struct MiMedia {
    #[serde(default)]
    track: Vec<MiTrack>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MiTrack {
    #[serde(rename = "@type")]
    kind: String,
    stream_order: Option<String>,
    format: Option<String>,
    codec_id: Option<String>,
    language: Option<String>,
    title: Option<String>,
    forced: Option<String>,
    default: Option<String>,
}

/// MediaInfo uses marketing-ish format names; fold them onto ffprobe codec
/// identifiers so both engines fill the cache identically.
fn normalize_codec(format: Option<&str>, codec_id: Option<&str>) -> String {
    let raw = format.or(codec_id).unwrap_or_default();
    match raw.to_ascii_lowercase().as_str() {
        "ass" | "advanced substation alpha" => "ass".into(),
        "ssa" | "substation alpha" => "ssa".into(),
        "utf-8" | "subrip" | "srt" => "subrip".into(),
        "webvtt" | "vtt" => "webvtt".into(),
        "pgs" => "hdmv_pgs_subtitle".into(),
        "vobsub" => "dvd_subtitle".into(),
        "avc" => "h264".into(),
        "hevc" => "hevc".into(),
        "ac-3" => "ac3".into(),
        "e-ac-3" => "eac3".into(),
        "mpeg audio" => "mp3".into(),
        other => other.to_string(),
    }
}

fn parse_output(output: &str) -> Result<Vec<MediaStream>, ProbeError> {
    let parsed: MiOutput =
        serde_json::from_str(output).map_err(|e| ProbeError::Parse(e.to_string(), "mediainfo"))?;

    let tracks = parsed.media.map(|m| m.track).unwrap_or_default();
    let mut fallback_index = 0u32;

    Ok(tracks
        .into_iter()
        .filter_map(|t| {
            let kind = match t.kind.as_str() {
                "Video" => StreamKind::Video,
                "Audio" => StreamKind::Audio,
                "Text" => StreamKind::Subtitle,
                "General" => return None,
                _ => StreamKind::Other,
            };
            let index = t
                .stream_order
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| {
                    let i = fallback_index;
                    fallback_index += 1;
                    i
                });
            Some(MediaStream {
                index,
                kind,
                codec_name: normalize_codec(t.format.as_deref(), t.codec_id.as_deref()),
                language: t.language.map(|l| l.to_ascii_lowercase()),
                title: t.title,
                disposition: Disposition {
                    forced: t.forced.as_deref() == Some("Yes"),
                    default: t.default.as_deref() == Some("Yes"),
                },
            })
        })
        .collect())
}

#[async_trait]
impl MediaProber for MediaInfoProber {
    fn engine(&self) -> &'static str {
        "mediainfo"
    }

    async fn probe(&self, path: &Path) -> Result<Vec<MediaStream>, ProbeError> {
        let run = Command::new(&self.binary)
            .arg("--Output=JSON")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = timeout(Duration::from_secs(self.timeout_secs), run)
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout_secs))?
            .map_err(|e| ProbeError::Spawn {
                tool: TOOL,
                source: e,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                tool: TOOL,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "media": {
            "track": [
                {"@type": "General"},
                {"@type": "Video", "StreamOrder": "0", "Format": "AVC"},
                {"@type": "Audio", "StreamOrder": "1", "Format": "AC-3",
                 "Language": "ja"},
                {"@type": "Text", "StreamOrder": "2", "Format": "ASS",
                 "Language": "en", "Title": "Full Subtitles",
                 "Default": "Yes", "Forced": "No"},
                {"@type": "Text", "StreamOrder": "3", "Format": "UTF-8",
                 "Language": "en", "Forced": "Yes"}
            ]
        }
    }"#;

    #[test]
    fn test_parse_normalizes_to_ffprobe_shape() {
        let streams = parse_output(SAMPLE).unwrap();
        assert_eq!(streams.len(), 4);
        assert_eq!(streams[0].kind, StreamKind::Video);
        assert_eq!(streams[0].codec_name, "h264");
        assert_eq!(streams[1].codec_name, "ac3");
        assert_eq!(streams[2].kind, StreamKind::Subtitle);
        assert_eq!(streams[2].codec_name, "ass");
        assert!(streams[2].disposition.default);
        assert_eq!(streams[3].codec_name, "subrip");
        assert!(streams[3].disposition.forced);
    }

    #[test]
    fn test_general_track_skipped() {
        let streams = parse_output(SAMPLE).unwrap();
        assert!(streams.iter().all(|s| s.index <= 3));
    }

    #[test]
    fn test_parse_empty_media() {
        let streams = parse_output(r#"{"media": null}"#).unwrap();
        assert!(streams.is_empty());
    }

    #[test]
    fn test_codec_normalization_matches_ffprobe() {
        assert_eq!(normalize_codec(Some("ASS"), None), "ass");
        assert_eq!(normalize_codec(Some("UTF-8"), None), "subrip");
        assert_eq!(normalize_codec(Some("PGS"), None), "hdmv_pgs_subtitle");
        assert_eq!(normalize_codec(None, Some("S_TEXT/WEBVTT")), "s_text/webvtt");
    }
}
