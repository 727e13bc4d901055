//! Prometheus metrics for core components.
//!
//! Collectors cover the job queue, provider engine, translation engine,
//! wanted reconciler and transcription lane. The server registers them all
//! into its registry for `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Jobs
// =============================================================================

/// Jobs finished, by kind and terminal state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sublarr_jobs_finished_total", "Jobs reaching a terminal state"),
        &["kind", "state"], // state: "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Job runtime in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("sublarr_job_duration_seconds", "Job runtime")
            .buckets(vec![1.0, 5.0, 15.0, 60.0, 180.0, 600.0, 1800.0, 3600.0]),
        &["kind"],
    )
    .unwrap()
});

// =============================================================================
// Providers
// =============================================================================

/// Provider searches, by provider and result.
pub static PROVIDER_SEARCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sublarr_provider_searches_total", "Provider search calls"),
        &["provider", "status"], // status: "success", "error"
    )
    .unwrap()
});

/// Results returned per provider search.
pub static PROVIDER_RESULTS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sublarr_provider_results",
            "Results returned per provider search",
        )
        .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        &["provider"],
    )
    .unwrap()
});

/// Subtitles downloaded, by provider.
pub static SUBTITLES_DOWNLOADED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sublarr_subtitles_downloaded_total", "Subtitle downloads"),
        &["provider"],
    )
    .unwrap()
});

/// Circuit breaker state per provider (0 closed, 1 half-open, 2 open).
pub static BREAKER_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("sublarr_breaker_state", "Provider circuit breaker state"),
        &["provider"],
    )
    .unwrap()
});

// =============================================================================
// Translation
// =============================================================================

/// Lines translated, by backend.
pub static TRANSLATION_LINES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sublarr_translation_lines_total", "Lines translated"),
        &["backend"],
    )
    .unwrap()
});

/// Translation requests, by backend and result.
pub static TRANSLATION_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sublarr_translation_requests_total",
            "Translation engine requests",
        ),
        &["backend", "status"],
    )
    .unwrap()
});

/// Hallucinations rejected by output validation.
pub static HALLUCINATIONS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "sublarr_hallucinations_rejected_total",
        "Translated lines rejected by script validation",
    )
    .unwrap()
});

// =============================================================================
// Wanted / transcription
// =============================================================================

/// Wanted rows by status, refreshed after each reconcile.
pub static WANTED_ITEMS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("sublarr_wanted_items", "Wanted rows by status"),
        &["status"],
    )
    .unwrap()
});

/// Reconcile passes.
pub static RECONCILE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sublarr_reconcile_runs_total", "Reconcile passes"),
        &["mode"], // "full", "incremental"
    )
    .unwrap()
});

/// Transcriptions, by result.
pub static TRANSCRIPTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sublarr_transcriptions_total", "Transcription runs"),
        &["status"],
    )
    .unwrap()
});

/// All core collectors, for registry registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(PROVIDER_SEARCHES.clone()),
        Box::new(PROVIDER_RESULTS.clone()),
        Box::new(SUBTITLES_DOWNLOADED.clone()),
        Box::new(BREAKER_STATE.clone()),
        Box::new(TRANSLATION_LINES.clone()),
        Box::new(TRANSLATION_REQUESTS.clone()),
        Box::new(HALLUCINATIONS_REJECTED.clone()),
        Box::new(WANTED_ITEMS.clone()),
        Box::new(RECONCILE_RUNS.clone()),
        Box::new(TRANSCRIPTIONS.clone()),
    ]
}

/// Bus subscriber feeding the domain counters.
pub struct MetricsCollector;

impl crate::events::EventHandler for MetricsCollector {
    fn event_types(&self) -> Option<Vec<&'static str>> {
        None
    }

    fn handle(
        &self,
        envelope: &crate::events::EventEnvelope,
    ) -> Result<(), Box<dyn std::error::Error>> {
        use crate::events::Event;
        match &envelope.event {
            Event::JobCompleted { .. } => {}
            Event::ProviderSearchCompleted {
                provider, results, ..
            } => {
                PROVIDER_SEARCHES
                    .with_label_values(&[provider, "success"])
                    .inc();
                PROVIDER_RESULTS
                    .with_label_values(&[provider])
                    .observe(*results as f64);
            }
            Event::SubtitleDownloaded { provider, .. } => {
                SUBTITLES_DOWNLOADED.with_label_values(&[provider]).inc();
            }
            Event::TranslationCompleted { backend, lines, .. } => {
                TRANSLATION_LINES
                    .with_label_values(&[backend])
                    .inc_by(*lines as u64);
                TRANSLATION_REQUESTS
                    .with_label_values(&[backend, "success"])
                    .inc();
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, EventEnvelope, EventHandler};

    #[test]
    fn test_all_metrics_register_cleanly() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
    }

    #[test]
    fn test_collector_counts_downloads() {
        let collector = MetricsCollector;
        let before = SUBTITLES_DOWNLOADED.with_label_values(&["test-prov"]).get();
        collector
            .handle(&EventEnvelope::new(Event::SubtitleDownloaded {
                file_path: "/m/a.mkv".into(),
                language: "de".into(),
                provider: "test-prov".into(),
                score: 100,
            }))
            .unwrap();
        assert_eq!(
            SUBTITLES_DOWNLOADED.with_label_values(&["test-prov"]).get(),
            before + 1
        );
    }

    #[test]
    fn test_collector_counts_translated_lines() {
        let collector = MetricsCollector;
        let before = TRANSLATION_LINES.with_label_values(&["test-be"]).get();
        collector
            .handle(&EventEnvelope::new(Event::TranslationCompleted {
                file_path: "/m/a.mkv".into(),
                language: "de".into(),
                backend: "test-be".into(),
                lines: 42,
            }))
            .unwrap();
        assert_eq!(
            TRANSLATION_LINES.with_label_values(&["test-be"]).get(),
            before + 42
        );
    }
}
