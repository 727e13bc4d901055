//! Atomic subtitle writing.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::types::PipelineError;

/// Reject paths that resolve outside the media root.
///
/// The file itself may not exist yet; the check canonicalizes the nearest
/// existing ancestor.
pub fn ensure_within_root(path: &Path, root: &Path) -> Result<(), PipelineError> {
    let root = root
        .canonicalize()
        .map_err(|_| PipelineError::PathOutsideMedia(path.to_path_buf()))?;

    let mut probe: PathBuf = path.to_path_buf();
    loop {
        if let Ok(resolved) = probe.canonicalize() {
            if resolved.starts_with(&root) {
                return Ok(());
            }
            return Err(PipelineError::PathOutsideMedia(path.to_path_buf()));
        }
        if !probe.pop() {
            return Err(PipelineError::PathOutsideMedia(path.to_path_buf()));
        }
    }
}

/// Write `content` to `path` atomically: sibling temp file, fsync, rename.
///
/// The rename is the last step, so a partial artifact is never visible at
/// the final path. The temp file is removed on any failure.
pub async fn atomic_write(path: &Path, content: &[u8]) -> Result<(), PipelineError> {
    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::PathOutsideMedia(path.to_path_buf()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.tmp-{}", Uuid::new_v4()));

    let result = write_and_rename(&temp, path, content).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    result
}

async fn write_and_rename(
    temp: &Path,
    path: &Path,
    content: &[u8],
) -> Result<(), PipelineError> {
    let mut file = tokio::fs::File::create(temp).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(temp, path).await?;
    Ok(())
}
