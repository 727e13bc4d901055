//! End-to-end acquisition scenarios over mock providers, probers and
//! translation backends.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use sublarr_core::testing::{
    MemoryProbeCache, MockProber, MockProvider, MockTranslationBackend,
};
use sublarr_core::{
    AcquireOutcome, AcquireRequest, AcquisitionPipeline, ArtifactSource, Db, EventBus,
    HistoryStore, PipelineConfig, ProbeService, ProviderEngine, ProviderEngineConfig,
    SqliteHealthStore, SqliteHistoryStore, SubtitleFormat, SubtitleProvider, TranslationEngine,
    TranslationEngineConfig,
};

struct Fixture {
    _dir: tempfile::TempDir,
    video: PathBuf,
    provider: Arc<MockProvider>,
    backend: Arc<MockTranslationBackend>,
    history: Arc<SqliteHistoryStore>,
    pipeline: Arc<AcquisitionPipeline>,
}

async fn fixture_with(provider: MockProvider, streams: Vec<sublarr_core::MediaStream>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("Show S01E02.mkv");
    std::fs::write(&video, b"not really a video").unwrap();

    let db = Db::in_memory().unwrap();
    let history = Arc::new(SqliteHistoryStore::new(db.clone()));
    let health = Arc::new(SqliteHealthStore::new(db));
    let events = Arc::new(EventBus::default());

    let provider = Arc::new(provider);
    let engine = Arc::new(
        ProviderEngine::new(
            ProviderEngineConfig {
                deadline_slack: std::time::Duration::from_millis(200),
                ..Default::default()
            },
            vec![provider.clone() as Arc<dyn SubtitleProvider>],
            health.clone(),
            Arc::clone(&events),
        )
        .await,
    );

    let backend = Arc::new(MockTranslationBackend::new("DE"));
    let translator = Arc::new(TranslationEngine::new(
        TranslationEngineConfig {
            retry_backoff_base: std::time::Duration::from_millis(1),
            ..Default::default()
        },
        vec![backend.clone() as Arc<dyn sublarr_core::TranslationBackend>],
        health,
    ));

    let probe = Arc::new(ProbeService::new(
        Arc::new(MockProber::new(streams)),
        Arc::new(MemoryProbeCache::default()),
    ));

    let pipeline = Arc::new(AcquisitionPipeline::new(
        PipelineConfig::new(dir.path()),
        probe,
        engine,
        translator,
        history.clone(),
        events,
    ));

    Fixture {
        _dir: dir,
        video,
        provider,
        backend,
        history,
        pipeline,
    }
}

fn request(fx: &Fixture) -> AcquireRequest {
    AcquireRequest::new(fx.video.clone(), "de", "en")
}

fn sibling(fx: &Fixture, suffix: &str) -> PathBuf {
    fx.video.with_file_name(format!("Show S01E02.{suffix}"))
}

const SOURCE_SRT: &str = "1\n00:00:01,000 --> 00:00:04,000\nHello there\n\n2\n00:00:05,000 --> 00:00:08,000\nSecond line\n\n";

// Scenario 1: an existing target ASS means skip, disk untouched.
#[tokio::test]
async fn test_case_a_existing_ass_skips() {
    let fx = fixture_with(MockProvider::new("mock"), Vec::new()).await;
    let ass = sibling(&fx, "de.ass");
    std::fs::write(&ass, b"[Script Info]\n").unwrap();
    let before = std::fs::read(&ass).unwrap();

    let outcome = fx.pipeline.acquire(request(&fx), None).await;

    assert!(matches!(outcome, AcquireOutcome::Skipped { .. }));
    assert_eq!(std::fs::read(&ass).unwrap(), before);
    assert_eq!(fx.provider.search_calls.load(Ordering::SeqCst), 0);
}

// Scenario 2: SRT exists, provider offers a styled candidate above the gate.
#[tokio::test]
async fn test_case_b_upgrade_via_provider() {
    let provider = MockProvider::new("mock");
    provider.push_result(MockProvider::result(
        "mock",
        "de",
        SubtitleFormat::Ass,
        &["hash", "series"],
    ));
    let fx = fixture_with(provider, Vec::new()).await;
    let srt = sibling(&fx, "de.srt");
    std::fs::write(&srt, SOURCE_SRT).unwrap();

    let outcome = fx.pipeline.acquire(request(&fx), None).await;

    match outcome {
        AcquireOutcome::Acquired {
            source, provider, ..
        } => {
            assert_eq!(source, ArtifactSource::Provider);
            assert_eq!(provider.as_deref(), Some("mock"));
        }
        other => panic!("expected provider acquisition, got {other:?}"),
    }
    // ASS written, SRT untouched, history recorded.
    assert!(sibling(&fx, "de.ass").exists());
    assert_eq!(std::fs::read_to_string(&srt).unwrap(), SOURCE_SRT);
    let record = fx
        .history
        .latest(&fx.video.to_string_lossy(), "de")
        .unwrap()
        .unwrap();
    assert_eq!(record.provider, "mock");
    assert_eq!(record.score, 359 + 180 + 50);
}

// Upgrade gate: a recent strong artifact blocks a marginal candidate.
#[tokio::test]
async fn test_case_b_upgrade_gate_rejects_marginal_candidate() {
    let provider = MockProvider::new("mock");
    // Candidate worth 359 + 50 = 409.
    provider.push_result(MockProvider::result(
        "mock",
        "de",
        SubtitleFormat::Ass,
        &["hash"],
    ));
    let fx = fixture_with(provider, Vec::new()).await;
    std::fs::write(sibling(&fx, "de.srt"), SOURCE_SRT).unwrap();

    // Recent download at score 400: required delta doubles to 20; 409 < 420.
    fx.history
        .insert(&sublarr_core::store::DownloadInsert {
            file_path: fx.video.to_string_lossy().to_string(),
            target_language: "de".to_string(),
            provider: "mock".to_string(),
            subtitle_id: "old".to_string(),
            score: 400,
            format: SubtitleFormat::Srt,
            source: ArtifactSource::Provider,
            content_hash: "old-hash".to_string(),
        })
        .unwrap();

    let outcome = fx.pipeline.acquire(request(&fx), None).await;

    assert!(matches!(outcome, AcquireOutcome::Skipped { .. }));
    assert!(!sibling(&fx, "de.ass").exists());
    assert_eq!(fx.provider.download_calls.load(Ordering::SeqCst), 0);
}

// Scenario: translate an external sibling source-language SRT (case C2).
#[tokio::test]
async fn test_case_c_translates_external_source_srt() {
    let fx = fixture_with(MockProvider::new("mock"), Vec::new()).await;
    std::fs::write(sibling(&fx, "en.srt"), SOURCE_SRT).unwrap();

    let outcome = fx.pipeline.acquire(request(&fx), None).await;

    match outcome {
        AcquireOutcome::Acquired { source, path, .. } => {
            assert_eq!(source, ArtifactSource::Translated);
            assert!(path.ends_with("Show S01E02.de.srt"));
        }
        other => panic!("expected translated acquisition, got {other:?}"),
    }

    let written = std::fs::read_to_string(sibling(&fx, "de.srt")).unwrap();
    let parsed = sublarr_core::SrtFile::parse(&written).unwrap();
    // Line count invariant: cue per source cue, each marked by the backend.
    assert_eq!(parsed.cues.len(), 2);
    assert!(parsed.cues.iter().all(|c| c.text.starts_with("DE ")));
    assert!(fx.backend.calls.load(Ordering::SeqCst) >= 1);
}

// Scenario: provider search in case C, target-language result kept as-is.
#[tokio::test]
async fn test_case_c_provider_download() {
    let provider = MockProvider::new("mock");
    provider.push_result(MockProvider::result(
        "mock",
        "de",
        SubtitleFormat::Srt,
        &["series", "season", "episode"],
    ));
    let fx = fixture_with(provider, Vec::new()).await;

    let outcome = fx.pipeline.acquire(request(&fx), None).await;

    match outcome {
        AcquireOutcome::Acquired { source, .. } => {
            assert_eq!(source, ArtifactSource::Provider)
        }
        other => panic!("expected provider acquisition, got {other:?}"),
    }
    assert!(sibling(&fx, "de.srt").exists());
    // No translation needed for a target-language result.
    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 0);
}

// Boundary: an empty source subtitle still succeeds with zero lines.
#[tokio::test]
async fn test_empty_source_subtitle_succeeds() {
    let fx = fixture_with(MockProvider::new("mock"), Vec::new()).await;
    std::fs::write(sibling(&fx, "en.srt"), "").unwrap();

    let outcome = fx.pipeline.acquire(request(&fx), None).await;

    assert!(outcome.is_success());
    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 0);
}

// Boundary: zero provider results and no other source fails with
// no-source-available.
#[tokio::test]
async fn test_case_c5_no_source_available() {
    let fx = fixture_with(MockProvider::new("mock"), Vec::new()).await;

    let outcome = fx.pipeline.acquire(request(&fx), None).await;

    match outcome {
        AcquireOutcome::Failed { code, .. } => assert_eq!(code, "PIPELINE_NO_SOURCE"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(fx.provider.download_calls.load(Ordering::SeqCst), 0);
}

// Invariant 6: concurrent requests for the same target coalesce.
#[tokio::test]
async fn test_concurrent_acquisitions_coalesce() {
    let fx = fixture_with(MockProvider::new("mock"), Vec::new()).await;
    std::fs::write(sibling(&fx, "en.srt"), SOURCE_SRT).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pipeline = Arc::clone(&fx.pipeline);
        let req = request(&fx);
        handles.push(tokio::spawn(async move { pipeline.acquire(req, None).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    // The translation ran once; everyone shared it.
    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), 1);
}

// Idempotence: a second acquisition of the same target is a no-op skip.
#[tokio::test]
async fn test_second_acquisition_is_noop() {
    let fx = fixture_with(MockProvider::new("mock"), Vec::new()).await;
    std::fs::write(sibling(&fx, "en.srt"), SOURCE_SRT).unwrap();

    let first = fx.pipeline.acquire(request(&fx), None).await;
    assert!(matches!(first, AcquireOutcome::Acquired { .. }));
    let calls_after_first = fx.backend.calls.load(Ordering::SeqCst);

    // The produced .de.srt is plain, so a second run lands in case B and
    // retains it (no styled source exists).
    let second = fx.pipeline.acquire(request(&fx), None).await;
    assert!(matches!(second, AcquireOutcome::Skipped { .. }));
    assert_eq!(fx.backend.calls.load(Ordering::SeqCst), calls_after_first);
}

// Forced requests write the .forced artifact and never match normal results.
#[tokio::test]
async fn test_forced_dimension_naming_and_filtering() {
    let provider = MockProvider::new("mock");
    let mut forced_result =
        MockProvider::result("mock", "de", SubtitleFormat::Ass, &["hash"]);
    forced_result.forced = true;
    provider.push_result(forced_result);
    let fx = fixture_with(provider, Vec::new()).await;

    // A normal request must not take the forced result.
    let outcome = fx.pipeline.acquire(request(&fx), None).await;
    assert!(matches!(outcome, AcquireOutcome::Failed { .. }));

    // A forced request does, and names the artifact accordingly.
    let mut forced_request = request(&fx);
    forced_request.subtitle_type = sublarr_core::SubtitleType::Forced;
    let outcome = fx.pipeline.acquire(forced_request, None).await;
    assert!(matches!(outcome, AcquireOutcome::Acquired { .. }));
    assert!(sibling(&fx, "de.forced.ass").exists());
}

// Atomicity: no temp files remain next to the video after acquisitions.
#[tokio::test]
async fn test_no_partial_artifacts_left_behind() {
    let fx = fixture_with(MockProvider::new("mock"), Vec::new()).await;
    std::fs::write(sibling(&fx, "en.srt"), SOURCE_SRT).unwrap();
    fx.pipeline.acquire(request(&fx), None).await;

    let stray: Vec<_> = std::fs::read_dir(fx.video.parent().unwrap())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
        .collect();
    assert!(stray.is_empty());
}
