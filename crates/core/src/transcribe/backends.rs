//! Transcription backends: whisper.cpp CLI and an external HTTP API.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::types::{Transcript, TranscribeError, TranscriptionBackend};

/// whisper.cpp CLI wrapper with lazy model availability checks.
pub struct WhisperCliBackend {
    model_path: PathBuf,
    cli_path: String,
    timeout: Duration,
}

impl WhisperCliBackend {
    pub fn new(model_path: PathBuf, cli_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            model_path,
            cli_path: cli_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperCliBackend {
    fn name(&self) -> &'static str {
        "whisper-cli"
    }

    async fn transcribe(
        &self,
        wav: &Path,
        language: &str,
    ) -> Result<Transcript, TranscribeError> {
        let output_base = wav.to_string_lossy().to_string();
        let args = vec![
            "-m".to_string(),
            self.model_path.to_string_lossy().to_string(),
            "-f".to_string(),
            output_base.clone(),
            "-osrt".to_string(),
            "-of".to_string(),
            output_base.clone(),
            // Entropy/log-prob thresholds keep silence from turning into
            // invented dialogue.
            "-et".to_string(),
            "2.4".to_string(),
            "-lpt".to_string(),
            "-0.5".to_string(),
            "--max-context".to_string(),
            "224".to_string(),
            "-l".to_string(),
            language.to_string(),
        ];

        let run = Command::new(&self.cli_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();
        let output = timeout(self.timeout, run)
            .await
            .map_err(|_| TranscribeError::Timeout)?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscribeError::NotAvailable
                } else {
                    TranscribeError::Backend(e.to_string())
                }
            })?;

        if !output.status.success() {
            return Err(TranscribeError::Backend(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let srt_path = format!("{output_base}.srt");
        let srt = tokio::fs::read_to_string(&srt_path)
            .await
            .map_err(|e| TranscribeError::Backend(format!("missing SRT output: {e}")))?;
        let _ = tokio::fs::remove_file(&srt_path).await;

        Ok(Transcript {
            srt,
            confidences: None,
        })
    }

    async fn is_available(&self) -> bool {
        if !self.model_path.exists() {
            return false;
        }
        Command::new(&self.cli_path)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// External transcription service speaking multipart WAV in, JSON out.
pub struct HttpTranscriptionBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTranscriptionBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    start: f64,
    end: f64,
    text: String,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    segments: Vec<ApiSegment>,
}

fn segments_to_srt(segments: &[ApiSegment]) -> (String, Vec<f32>) {
    let mut srt = String::new();
    let mut confidences = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        srt.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(segment.start),
            format_timestamp(segment.end),
            segment.text.trim()
        ));
        confidences.push(segment.confidence.unwrap_or(1.0));
    }
    (srt, confidences)
}

fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

#[async_trait]
impl TranscriptionBackend for HttpTranscriptionBackend {
    fn name(&self) -> &'static str {
        "http-api"
    }

    async fn transcribe(
        &self,
        wav: &Path,
        language: &str,
    ) -> Result<Transcript, TranscribeError> {
        let bytes = tokio::fs::read(wav)
            .await
            .map_err(|e| TranscribeError::AudioExtraction(e.to_string()))?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Backend(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("language", language.to_string());

        let mut request = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| TranscribeError::Timeout)?
            .map_err(|e| TranscribeError::Backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TranscribeError::Backend(format!(
                "status {}",
                response.status()
            )));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::Backend(format!("bad response: {e}")))?;
        let (srt, confidences) = segments_to_srt(&parsed.segments);
        Ok(Transcript {
            srt,
            confidences: Some(confidences),
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_to_srt() {
        let segments = vec![
            ApiSegment {
                start: 1.0,
                end: 4.0,
                text: "Hello world".into(),
                confidence: Some(0.95),
            },
            ApiSegment {
                start: 5.5,
                end: 8.0,
                text: " trimmed ".into(),
                confidence: None,
            },
        ];
        let (srt, confidences) = segments_to_srt(&segments);
        assert!(srt.contains("00:00:01,000 --> 00:00:04,000"));
        assert!(srt.contains("Hello world"));
        assert!(srt.contains("trimmed\n"));
        assert_eq!(confidences, vec![0.95, 1.0]);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(90.5), "00:01:30,500");
        assert_eq!(format_timestamp(5445.25), "01:30:45,250");
    }

    #[test]
    fn test_api_response_parsing() {
        let body = r#"{"segments": [{"start": 0.0, "end": 2.0, "text": "hi", "confidence": 0.4}]}"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].confidence, Some(0.4));
    }
}
