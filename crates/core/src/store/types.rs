//! Persisted entity types.
//!
//! The store owns these rows; domain code works on value copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subtitle::SubtitleFormat;

/// Work item kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Translate,
    Batch,
    WantedSearch,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translate => "translate",
            Self::Batch => "batch",
            Self::WantedSearch => "wanted-search",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "translate" => Some(Self::Translate),
            "batch" => Some(Self::Batch),
            "wanted-search" => Some(Self::WantedSearch),
            _ => None,
        }
    }
}

/// Job lifecycle state. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Cancelled | Self::Failed),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// A persisted job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub state: JobState,
    pub file_path: String,
    pub target_language: String,
    /// Kind-specific payload (batch file list, wanted id) as JSON.
    pub payload: Option<String>,
    /// Completion fraction in `[0, 1]`, monotonic within a run.
    pub progress: f32,
    pub error: Option<String>,
    /// Fingerprint of the backend config the job ran against.
    pub fingerprint: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Media kind of a wanted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Episode,
    Movie,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Movie => "movie",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "episode" => Some(Self::Episode),
            "movie" => Some(Self::Movie),
            _ => None,
        }
    }
}

/// The subtitle dimension a wanted row tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleType {
    Normal,
    Forced,
    SignsSongs,
}

impl SubtitleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Forced => "forced",
            Self::SignsSongs => "signs_songs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "forced" => Some(Self::Forced),
            "signs_songs" => Some(Self::SignsSongs),
            _ => None,
        }
    }
}

/// Wanted-item status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WantedStatus {
    Wanted,
    UpgradeCandidate,
    Searching,
    Found,
    Failed,
    Ignored,
}

impl WantedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wanted => "wanted",
            Self::UpgradeCandidate => "upgrade_candidate",
            Self::Searching => "searching",
            Self::Found => "found",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wanted" => Some(Self::Wanted),
            "upgrade_candidate" => Some(Self::UpgradeCandidate),
            "searching" => Some(Self::Searching),
            "found" => Some(Self::Found),
            "failed" => Some(Self::Failed),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }

    /// `ignored` holds until an operator clears it.
    pub fn is_absorbing(&self) -> bool {
        matches!(self, Self::Ignored)
    }
}

/// A persisted wanted row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WantedItem {
    pub id: i64,
    pub kind: MediaKind,
    pub series_id: Option<i64>,
    pub episode_id: Option<i64>,
    pub file_path: String,
    pub target_language: String,
    pub subtitle_type: SubtitleType,
    pub status: WantedStatus,
    pub search_count: u32,
    pub last_searched_at: Option<DateTime<Utc>>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How an artifact on disk came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    Provider,
    Translated,
    Whisper,
}

impl ArtifactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Translated => "translated",
            Self::Whisper => "whisper",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider" => Some(Self::Provider),
            "translated" => Some(Self::Translated),
            "whisper" => Some(Self::Whisper),
            _ => None,
        }
    }
}

/// One download-history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: i64,
    pub file_path: String,
    pub target_language: String,
    pub provider: String,
    pub subtitle_id: String,
    pub score: u32,
    pub format: SubtitleFormat,
    pub source: ArtifactSource,
    pub content_hash: String,
    pub downloaded_at: DateTime<Utc>,
}

/// Persisted health counters for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealthRecord {
    pub provider: String,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_ms: f64,
    pub breaker_state: String,
    pub breaker_opened_at: Option<DateTime<Utc>>,
    pub auto_disabled_until: Option<DateTime<Utc>>,
}

/// Persisted health counters for a translation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealthRecord {
    pub backend: String,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_ms: f64,
    pub auto_disabled_until: Option<DateTime<Utc>>,
}

/// A named set of target languages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub id: i64,
    pub name: String,
    pub languages: Vec<String>,
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_terminality() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        for terminal in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            for next in [
                JobState::Queued,
                JobState::Running,
                JobState::Completed,
                JobState::Failed,
                JobState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_legal_transitions() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Queued.can_transition_to(JobState::Cancelled));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(JobState::Running.can_transition_to(JobState::Cancelled));
        assert!(!JobState::Running.can_transition_to(JobState::Queued));
    }

    #[test]
    fn test_string_roundtrips() {
        for kind in [JobKind::Translate, JobKind::Batch, JobKind::WantedSearch] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        for status in [
            WantedStatus::Wanted,
            WantedStatus::UpgradeCandidate,
            WantedStatus::Searching,
            WantedStatus::Found,
            WantedStatus::Failed,
            WantedStatus::Ignored,
        ] {
            assert_eq!(WantedStatus::parse(status.as_str()), Some(status));
        }
        for st in [
            SubtitleType::Normal,
            SubtitleType::Forced,
            SubtitleType::SignsSongs,
        ] {
            assert_eq!(SubtitleType::parse(st.as_str()), Some(st));
        }
    }

    #[test]
    fn test_ignored_is_absorbing() {
        assert!(WantedStatus::Ignored.is_absorbing());
        assert!(!WantedStatus::Failed.is_absorbing());
    }
}
