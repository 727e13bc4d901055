//! Types for the provider engine.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::subtitle::SubtitleFormat;

/// External identifiers of a series or movie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    pub imdb: Option<String>,
    pub tmdb: Option<u64>,
    pub tvdb: Option<u64>,
    pub anilist: Option<u64>,
    pub anidb: Option<u64>,
}

/// Everything known about a video at search time. Built once per acquisition
/// attempt and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoQuery {
    pub path: PathBuf,
    /// OpenSubtitles-convention hash (first + last 64 KiB), if computed.
    pub file_hash: Option<String>,
    pub file_size: u64,
    pub title: Option<String>,
    pub year: Option<u32>,
    #[serde(default)]
    pub ids: ExternalIds,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub release_group: Option<String>,
    pub source: Option<String>,
    pub resolution: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// Target languages requested, ISO 639-1.
    pub languages: Vec<String>,
}

impl VideoQuery {
    pub fn new(path: impl Into<PathBuf>, languages: Vec<String>) -> Self {
        Self {
            path: path.into(),
            file_hash: None,
            file_size: 0,
            title: None,
            year: None,
            ids: ExternalIds::default(),
            season: None,
            episode: None,
            release_group: None,
            source: None,
            resolution: None,
            video_codec: None,
            audio_codec: None,
            languages,
        }
    }

    /// Episode queries carry season/episode numbers; everything else scores
    /// as a movie.
    pub fn is_episode(&self) -> bool {
        self.season.is_some() || self.episode.is_some()
    }
}

/// A candidate returned by a provider search.
///
/// Providers report what they verified in `matches`; the engine computes the
/// score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: String,
    /// Provider-internal identifier.
    pub id: String,
    /// ISO 639-1 language of the subtitle.
    pub language: String,
    pub format: SubtitleFormat,
    pub filename: Option<String>,
    /// Opaque reference the provider resolves at download time.
    pub download_ref: String,
    pub release_info: Option<String>,
    #[serde(default)]
    pub hearing_impaired: bool,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub machine_translated: bool,
    /// Attributes the provider verified: `hash`, `series`, `title`, `year`,
    /// `season`, `episode`, `release_group`, `source`, `audio_codec`,
    /// `resolution`, `hearing_impaired`.
    #[serde(default)]
    pub matches: HashSet<String>,
}

/// A result with its computed score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
    #[serde(flatten)]
    pub result: ProviderResult,
    pub score: u32,
    /// Priority of the provider that produced it (lower wins ties).
    pub provider_priority: u8,
}

/// Declared request allowance of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests: u32,
    pub window_seconds: u64,
}

/// Kind of a provider config field, for settings UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFieldKind {
    Text,
    Password,
    Number,
    Bool,
}

/// One entry of a provider's config schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: &'static str,
    pub kind: ConfigFieldKind,
    pub required: bool,
}

/// Errors raised by providers and the engine.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {provider} authentication failed: {message}")]
    Auth { provider: String, message: String },

    #[error("provider {provider} rate limited")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("provider {provider} transient error: {message}")]
    Transient { provider: String, message: String },

    #[error("provider {provider} returned an unusable payload: {message}")]
    Format { provider: String, message: String },

    #[error("archive rejected: {0}")]
    ArchiveSuspicious(String),

    #[error("provider {0} is not configured")]
    NotConfigured(String),

    #[error("no provider produced a result")]
    NoResults,
}

impl ProviderError {
    /// Transient failures are worth retrying on the same provider.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Auth { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Transient { provider, .. }
            | Self::Format { provider, .. } => Some(provider),
            Self::NotConfigured(provider) => Some(provider),
            _ => None,
        }
    }
}

/// A subtitle provider.
///
/// `search` must not sort or filter by score; ranking belongs to the engine.
/// `download` returns the decompressed subtitle body.
#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Languages the provider can serve, ISO 639-1.
    fn languages(&self) -> Vec<String>;

    fn rate_limit(&self) -> RateLimit;

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    fn max_retries(&self) -> u32 {
        2
    }

    /// Tie-break priority; lower wins.
    fn priority(&self) -> u8 {
        50
    }

    fn config_fields(&self) -> Vec<ConfigField>;

    /// One-time setup (authentication, token refresh).
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn search(&self, query: &VideoQuery) -> Result<Vec<ProviderResult>, ProviderError>;

    async fn download(&self, result: &ProviderResult) -> Result<Vec<u8>, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;

    async fn terminate(&self) {}
}
