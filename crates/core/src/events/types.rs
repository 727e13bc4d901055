//! Event catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the event payload catalog. Bumped on breaking payload changes
/// so WebSocket and webhook consumers can detect a mismatch.
pub const CATALOG_VERSION: u32 = 1;

/// Phase a job worker is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Probe,
    ProviderSearch,
    ProviderDownload,
    Translate,
    Transcribe,
    Write,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::ProviderSearch => "provider_search",
            Self::ProviderDownload => "provider_download",
            Self::Translate => "translate",
            Self::Transcribe => "transcribe",
            Self::Write => "write",
        }
    }
}

/// Business events published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    JobCreated {
        job_id: String,
        kind: String,
        file_path: String,
        target_language: String,
    },
    JobStarted {
        job_id: String,
    },
    JobProgress {
        job_id: String,
        fraction: f32,
        phase: JobPhase,
    },
    JobCompleted {
        job_id: String,
        outcome: String,
        output_path: Option<String>,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
    JobCancelled {
        job_id: String,
    },
    BatchProgress {
        job_id: String,
        completed: usize,
        skipped: usize,
        failed: usize,
        total: usize,
    },
    WantedScanned {
        scanned: usize,
        added: usize,
        satisfied: usize,
    },
    WantedSearchCompleted {
        wanted_id: i64,
        found: bool,
    },
    ProviderSearchCompleted {
        provider: String,
        results: usize,
        duration_ms: u64,
    },
    SubtitleDownloaded {
        file_path: String,
        language: String,
        provider: String,
        score: u32,
    },
    TranslationCompleted {
        file_path: String,
        language: String,
        backend: String,
        lines: usize,
    },
    WebhookReceived {
        source: String,
        kind: String,
    },
}

impl Event {
    /// Stable event-type string for routing and storage.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job.created",
            Self::JobStarted { .. } => "job.started",
            Self::JobProgress { .. } => "job.progress",
            Self::JobCompleted { .. } => "job.completed",
            Self::JobFailed { .. } => "job.failed",
            Self::JobCancelled { .. } => "job.cancelled",
            Self::BatchProgress { .. } => "batch.progress",
            Self::WantedScanned { .. } => "wanted.scanned",
            Self::WantedSearchCompleted { .. } => "wanted.search_completed",
            Self::ProviderSearchCompleted { .. } => "provider.search_completed",
            Self::SubtitleDownloaded { .. } => "subtitle.downloaded",
            Self::TranslationCompleted { .. } => "translation.completed",
            Self::WebhookReceived { .. } => "webhook.received",
        }
    }

    /// Job id, for job-scoped events.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobCreated { job_id, .. }
            | Self::JobStarted { job_id }
            | Self::JobProgress { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id }
            | Self::BatchProgress { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

/// An event with its publication metadata, as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub catalog_version: u32,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            catalog_version: CATALOG_VERSION,
            ts: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_strings() {
        let event = Event::JobCreated {
            job_id: "j1".into(),
            kind: "translate".into(),
            file_path: "/media/a.mkv".into(),
            target_language: "de".into(),
        };
        assert_eq!(event.event_type(), "job.created");
        assert_eq!(event.job_id(), Some("j1"));

        let event = Event::SubtitleDownloaded {
            file_path: "/media/a.mkv".into(),
            language: "de".into(),
            provider: "opensubtitles".into(),
            score: 359,
        };
        assert_eq!(event.event_type(), "subtitle.downloaded");
        assert_eq!(event.job_id(), None);
    }

    #[test]
    fn test_envelope_carries_catalog_version() {
        let envelope = EventEnvelope::new(Event::JobStarted { job_id: "j".into() });
        assert_eq!(envelope.catalog_version, CATALOG_VERSION);
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"catalog_version\":1"));
        assert!(json.contains("\"type\":\"job_started\""));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = EventEnvelope::new(Event::JobProgress {
            job_id: "j".into(),
            fraction: 0.5,
            phase: JobPhase::Translate,
        });
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed.event,
            Event::JobProgress { fraction, phase: JobPhase::Translate, .. } if fraction == 0.5
        ));
    }

    #[test]
    fn test_phase_strings() {
        assert_eq!(JobPhase::Probe.as_str(), "probe");
        assert_eq!(JobPhase::ProviderSearch.as_str(), "provider_search");
        assert_eq!(JobPhase::Write.as_str(), "write");
    }
}
