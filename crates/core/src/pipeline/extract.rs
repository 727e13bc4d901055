//! Embedded subtitle extraction via stream copy.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::subtitle::SubtitleFormat;

use super::types::PipelineError;

/// Extract one subtitle stream from a container, returning its text.
///
/// ASS/SSA streams are stream-copied; SRT-family streams are emitted as
/// SubRip. The temp file is removed on every exit path.
pub async fn extract_embedded_subtitle(
    video: &Path,
    stream_index: u32,
    format: SubtitleFormat,
    timeout_secs: u64,
) -> Result<String, PipelineError> {
    let temp = std::env::temp_dir().join(format!(
        "sublarr-extract-{}.{}",
        uuid::Uuid::new_v4(),
        format.extension()
    ));

    let codec = if format.is_styled() { "copy" } else { "srt" };
    let run = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-i"])
        .arg(video)
        .args(["-map", &format!("0:{stream_index}"), "-c:s", codec])
        .arg(&temp)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();

    let output = match timeout(Duration::from_secs(timeout_secs), run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PipelineError::Io(e));
        }
        Err(_) => {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("subtitle extraction timed out after {timeout_secs}s"),
            )));
        }
    };

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(PipelineError::Io(std::io::Error::other(format!(
            "ffmpeg extraction failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))));
    }

    let content = tokio::fs::read_to_string(&temp).await;
    let _ = tokio::fs::remove_file(&temp).await;
    content.map_err(PipelineError::Io)
}
