//! Types for library sources.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ExternalIds;
use crate::store::MediaKind;

/// One media item the library expects subtitles for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedItem {
    pub kind: MediaKind,
    pub series_id: Option<i64>,
    pub episode_id: Option<i64>,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub file_path: PathBuf,
    #[serde(default)]
    pub ids: ExternalIds,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library source unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A source of expected media items.
#[async_trait]
pub trait LibrarySource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn expected_items(&self) -> Result<Vec<ExpectedItem>, LibraryError>;

    /// Refresh a series' external-id mapping. Called transparently when a
    /// cached mapping expired; reads never bump freshness on their own.
    async fn refresh_external_ids(&self, _series_id: i64) -> Result<ExternalIds, LibraryError> {
        Ok(ExternalIds::default())
    }
}
