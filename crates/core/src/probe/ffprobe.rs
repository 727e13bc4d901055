//! ffprobe-based probe engine.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::types::{Disposition, MediaProber, MediaStream, ProbeError, StreamKind};

const TOOL: &str = "ffprobe";

/// Probe engine backed by the `ffprobe` binary.
pub struct FfprobeProber {
    binary: String,
    timeout_secs: u64,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs,
        }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new(TOOL, 30)
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    disposition: ProbeDisposition,
}

#[derive(Default, Deserialize)]
struct ProbeTags {
    language: Option<String>,
    title: Option<String>,
}

#[derive(Default, Deserialize)]
struct ProbeDisposition {
    #[serde(default)]
    forced: u8,
    #[serde(default)]
    default: u8,
}

fn parse_output(output: &str) -> Result<Vec<MediaStream>, ProbeError> {
    let probe: ProbeOutput =
        serde_json::from_str(output).map_err(|e| ProbeError::Parse(e.to_string(), "ffprobe"))?;

    Ok(probe
        .streams
        .into_iter()
        .map(|s| MediaStream {
            index: s.index,
            kind: match s.codec_type.as_deref() {
                Some("video") => StreamKind::Video,
                Some("audio") => StreamKind::Audio,
                Some("subtitle") => StreamKind::Subtitle,
                _ => StreamKind::Other,
            },
            codec_name: s.codec_name.unwrap_or_default().to_ascii_lowercase(),
            language: s.tags.language.map(|l| l.to_ascii_lowercase()),
            title: s.tags.title,
            disposition: Disposition {
                forced: s.disposition.forced != 0,
                default: s.disposition.default != 0,
            },
        })
        .collect())
}

#[async_trait]
impl MediaProber for FfprobeProber {
    fn engine(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> Result<Vec<MediaStream>, ProbeError> {
        // -show_streams with no selector: one call covers video, audio and
        // subtitle streams alike.
        let run = Command::new(&self.binary)
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
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
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac",
             "tags": {"language": "jpn"}},
            {"index": 2, "codec_type": "subtitle", "codec_name": "ass",
             "tags": {"language": "eng", "title": "Full Subtitles"},
             "disposition": {"forced": 0, "default": 1}},
            {"index": 3, "codec_type": "subtitle", "codec_name": "subrip",
             "tags": {"language": "eng", "title": "Signs"},
             "disposition": {"forced": 1, "default": 0}}
        ]
    }"#;

    #[test]
    fn test_parse_all_stream_kinds() {
        let streams = parse_output(SAMPLE).unwrap();
        assert_eq!(streams.len(), 4);
        assert_eq!(streams[0].kind, StreamKind::Video);
        assert_eq!(streams[1].kind, StreamKind::Audio);
        assert_eq!(streams[1].language.as_deref(), Some("jpn"));
        assert_eq!(streams[2].kind, StreamKind::Subtitle);
        assert_eq!(streams[2].codec_name, "ass");
        assert!(streams[2].disposition.default);
        assert!(!streams[2].disposition.forced);
        assert!(streams[3].disposition.forced);
    }

    #[test]
    fn test_parse_missing_optional_fields() {
        let streams =
            parse_output(r#"{"streams": [{"index": 0, "codec_type": "video"}]}"#).unwrap();
        assert_eq!(streams[0].codec_name, "");
        assert!(streams[0].language.is_none());
    }

    #[test]
    fn test_parse_empty_streams() {
        let streams = parse_output(r#"{"streams": []}"#).unwrap();
        assert!(streams.is_empty());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_output("not json"),
            Err(ProbeError::Parse(..))
        ));
    }
}
