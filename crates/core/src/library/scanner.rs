//! Standalone folder scanner.
//!
//! Walks the media root and treats every video file as an expected item.
//! Used when no upstream library manager feeds the reconciler.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::pipeline::parse_media_name;
use crate::store::MediaKind;

use super::types::{ExpectedItem, LibraryError, LibrarySource};

const VIDEO_EXTENSIONS: [&str; 6] = ["mkv", "mp4", "avi", "m4v", "mov", "ts"];

pub struct FolderScanner {
    root: PathBuf,
    max_depth: usize,
}

impl FolderScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: 8,
        }
    }

    fn walk(dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<PathBuf>) {
        if depth > max_depth {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, depth + 1, max_depth, out);
            } else if path
                .extension()
                .map(|ext| {
                    VIDEO_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str())
                })
                .unwrap_or(false)
            {
                out.push(path);
            }
        }
    }
}

#[async_trait]
impl LibrarySource for FolderScanner {
    fn name(&self) -> &'static str {
        "folder-scanner"
    }

    async fn expected_items(&self) -> Result<Vec<ExpectedItem>, LibraryError> {
        let root = self.root.clone();
        let max_depth = self.max_depth;
        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            FolderScanner::walk(&root, 0, max_depth, &mut files);
            files.sort();
            files
        })
        .await
        .map_err(|e| LibraryError::Unavailable(e.to_string()))?;

        Ok(files
            .into_iter()
            .map(|path| {
                let (title, season, episode, year) = parse_media_name(&path);
                let kind = if season.is_some() || episode.is_some() {
                    MediaKind::Episode
                } else {
                    MediaKind::Movie
                };
                ExpectedItem {
                    kind,
                    series_id: None,
                    episode_id: None,
                    title,
                    year,
                    season,
                    episode,
                    file_path: path,
                    ids: Default::default(),
                    tags: Vec::new(),
                }
            })
            .collect())
    }
}
