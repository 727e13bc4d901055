use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sublarr_core::{
    create_authenticator, validate_config, AcquisitionPipeline, Authenticator, BackupManager,
    ConfigHandle, Db, EventBus, FfprobeProber, FolderScanner, Glossary,
    HttpMediaServerNotifier, HttpTranscriptionBackend, JobQueue, JobQueueConfig, JobStore,
    LibrarySource,
    MediaInfoProber, MediaProber, MetricsCollector, NotifyHandler, PipelineConfig, ProbeService,
    ProviderEngine, ProviderEngineConfig, Reconciler, ReconcilerConfig, SqliteConfigStore,
    SqliteHealthStore, SqliteHistoryStore, SqliteJobStore, SqliteProbeCache, SqliteProfileStore,
    SqliteWantedStore, SubtitleProvider, TranscribeQueue, TranscribeQueueConfig,
    TranslationBackend, TranslationEngine, TranslationEngineConfig, WantedScheduler,
    WantedSchedulerConfig, WebhookDispatcher, WebhookDispatcherConfig, WhisperCliBackend,
};

use sublarr_server::api::create_router;
use sublarr_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("SUBLARR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("sublarr.toml"));
    info!("Loading configuration from {config_path:?}");
    let base_config = sublarr_core::load_config(&config_path)
        .with_context(|| format!("failed to load config from {config_path:?}"))?;
    validate_config(&base_config).context("configuration validation failed")?;

    std::fs::create_dir_all(&base_config.storage.data_dir)
        .with_context(|| format!("cannot create data dir {:?}", base_config.storage.data_dir))?;

    // Store: one connection, many repositories.
    let db = Db::open(&base_config.storage.database_path())
        .context("failed to open the database")?;
    let job_store = Arc::new(SqliteJobStore::new(db.clone()));
    let wanted_store = Arc::new(SqliteWantedStore::new(db.clone()));
    let history = Arc::new(SqliteHistoryStore::new(db.clone()));
    let health = Arc::new(SqliteHealthStore::new(db.clone()));
    let profiles = Arc::new(SqliteProfileStore::new(db.clone()));
    let config_store = Arc::new(SqliteConfigStore::new(db.clone()));
    let probe_cache = Arc::new(SqliteProbeCache::new(db.clone()));
    info!("Store initialized at {:?}", base_config.storage.database_path());

    let config = ConfigHandle::new(base_config, config_store);
    let effective = config.effective();

    let authenticator: Arc<dyn Authenticator> =
        Arc::from(create_authenticator(&effective.server.api_key));
    info!("Using authenticator: {}", authenticator.method());

    // Event bus and its standing subscribers.
    let events = Arc::new(EventBus::default());
    events.register(Box::new(MetricsCollector));
    if !effective.webhooks.urls.is_empty() {
        info!(urls = effective.webhooks.urls.len(), "webhook dispatcher enabled");
        events.register(Box::new(WebhookDispatcher::new(WebhookDispatcherConfig {
            urls: effective.webhooks.urls.clone(),
            ..Default::default()
        })));
    }
    if let Some(url) = &effective.media_server.url {
        info!("media server notifier enabled");
        events.register(Box::new(NotifyHandler::new(Arc::new(
            HttpMediaServerNotifier::new(url.clone(), effective.media_server.api_key.clone()),
        ))));
    }

    // Probe service with the configured engine.
    let prober: Arc<dyn MediaProber> = match effective.probe.engine.as_str() {
        "mediainfo" => Arc::new(MediaInfoProber::new("mediainfo", effective.probe.timeout_secs)),
        _ => Arc::new(FfprobeProber::new("ffprobe", effective.probe.timeout_secs)),
    };
    info!("Probe engine: {}", prober.engine());
    let probe = Arc::new(ProbeService::new(prober, probe_cache));

    // Providers.
    let mut providers: Vec<Arc<dyn SubtitleProvider>> = Vec::new();
    if let Some(os_config) = &effective.providers.opensubtitles {
        providers.push(Arc::new(
            sublarr_core::provider::providers::OpenSubtitlesProvider::new(os_config.clone()),
        ));
    }
    if let Some(jimaku_config) = &effective.providers.jimaku {
        providers.push(Arc::new(
            sublarr_core::provider::providers::JimakuProvider::new(jimaku_config.clone()),
        ));
    }
    if let Some(podnapisi_config) = &effective.providers.podnapisi {
        providers.push(Arc::new(
            sublarr_core::provider::providers::PodnapisiProvider::new(podnapisi_config.clone()),
        ));
    }
    info!(count = providers.len(), "providers configured");
    for provider in &providers {
        if let Err(e) = provider.initialize().await {
            warn!(provider = provider.name(), error = %e, "provider init failed");
        }
    }
    let provider_engine = Arc::new(
        ProviderEngine::new(
            ProviderEngineConfig::default(),
            providers,
            health.clone(),
            Arc::clone(&events),
        )
        .await,
    );

    // Translation backends, preferred-first.
    let mut backends: Vec<Arc<dyn TranslationBackend>> = Vec::new();
    if let Some(ollama) = &effective.translation.ollama {
        backends.push(Arc::new(
            sublarr_core::translate::backends::OllamaBackend::new(ollama.clone()),
        ));
    }
    if let Some(openai) = &effective.translation.openai {
        backends.push(Arc::new(
            sublarr_core::translate::backends::OpenAiBackend::new(openai.clone()),
        ));
    }
    if let Some(deepl) = &effective.translation.deepl {
        backends.push(Arc::new(
            sublarr_core::translate::backends::DeepLBackend::new(deepl.clone()),
        ));
    }
    if let Some(libre) = &effective.translation.libretranslate {
        backends.push(Arc::new(
            sublarr_core::translate::backends::LibreTranslateBackend::new(libre.clone()),
        ));
    }
    if let Some(google) = &effective.translation.google {
        backends.push(Arc::new(
            sublarr_core::translate::backends::GoogleTranslateBackend::new(google.clone()),
        ));
    }
    if let Some(preferred) = &effective.translation.preferred {
        backends.sort_by_key(|b| if b.name() == preferred { 0 } else { 1 });
    }
    info!(count = backends.len(), "translation backends configured");
    let translator = Arc::new(TranslationEngine::new(
        TranslationEngineConfig::default(),
        backends,
        health.clone(),
    ));

    // Optional transcription lane.
    let transcriber = if effective.transcription.enabled {
        let backend: Arc<dyn sublarr_core::TranscriptionBackend> =
            match effective.transcription.backend.as_str() {
                "http" => Arc::new(HttpTranscriptionBackend::new(
                    effective.transcription.api_url.clone().unwrap_or_default(),
                    effective.transcription.api_key.clone(),
                    std::time::Duration::from_secs(3600),
                )),
                _ => Arc::new(WhisperCliBackend::new(
                    effective
                        .transcription
                        .model_path
                        .clone()
                        .unwrap_or_default(),
                    "whisper-cli",
                    std::time::Duration::from_secs(3600),
                )),
            };
        let queue = TranscribeQueue::new(
            TranscribeQueueConfig {
                min_confidence: effective.transcription.min_confidence,
                ..Default::default()
            },
            backend,
            None,
        );
        Arc::clone(&queue).start();
        info!("transcription lane started");
        Some(queue)
    } else {
        None
    };

    // Acquisition pipeline.
    let pipeline_config = PipelineConfig {
        media_root: effective.media.root.clone(),
        upgrade_min_delta: effective.scoring.upgrade_min_delta,
        upgrade_window_days: effective.scoring.upgrade_window_days,
        extract_timeout_secs: 120,
        enable_transcription: effective.transcription.enabled,
    };
    let mut pipeline = AcquisitionPipeline::new(
        pipeline_config,
        Arc::clone(&probe),
        Arc::clone(&provider_engine),
        Arc::clone(&translator),
        history.clone(),
        Arc::clone(&events),
    );
    if !effective.translation.glossary.is_empty() {
        pipeline = pipeline.with_glossary(Glossary::new(effective.translation.glossary.clone()));
    }
    if let Some(queue) = &transcriber {
        pipeline = pipeline.with_transcriber(Arc::clone(queue));
    }
    let weight_config = Arc::clone(&config);
    pipeline = pipeline.with_weight_source(Arc::new(move || {
        let effective = weight_config.effective();
        (
            weight_config.fingerprint(),
            effective.scoring.episode,
            effective.scoring.movie,
        )
    }));
    let pipeline = Arc::new(pipeline);

    // Job queue.
    let jobs = JobQueue::new(
        JobQueueConfig {
            workers: effective.jobs.workers,
            source_language: effective.media.source_language.clone(),
            ..Default::default()
        },
        job_store.clone(),
        wanted_store.clone(),
        Arc::clone(&pipeline),
        Arc::clone(&events),
    );
    Arc::clone(&jobs).start();
    info!(workers = effective.jobs.workers, "job queue started");

    // Reconciler + scheduler over the folder scanner.
    let library: Arc<dyn LibrarySource> = Arc::new(FolderScanner::new(&effective.media.root));
    let reconciler = Arc::new(Reconciler::new(
        ReconcilerConfig {
            full_sweep_every: effective.wanted.full_sweep_every,
            default_languages: effective.media.languages.clone(),
            track_forced: effective.media.track_forced,
            ..Default::default()
        },
        library,
        Arc::clone(&probe),
        wanted_store.clone(),
        profiles.clone(),
        Arc::clone(&events),
    ));
    let scheduler = WantedScheduler::new(
        WantedSchedulerConfig {
            rescan_interval: std::time::Duration::from_secs(
                effective.wanted.rescan_interval_hours * 3600,
            ),
            batch_search_interval: std::time::Duration::from_secs(
                effective.wanted.batch_search_interval_hours * 3600,
            ),
            max_attempts: effective.wanted.max_attempts,
            ..Default::default()
        },
        Arc::clone(&reconciler),
        wanted_store.clone(),
        Arc::clone(&jobs),
    );
    Arc::clone(&scheduler).start();
    info!("wanted scheduler started");

    let backups = Arc::new(BackupManager::new(
        db.clone(),
        effective.storage.backups_dir(),
    ));

    // Daily maintenance: backup rotation, job retention, WAL truncation.
    {
        let backups = Arc::clone(&backups);
        let job_store = Arc::clone(&job_store);
        let db = db.clone();
        let retention_days = effective.jobs.retention_days;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                match backups.run() {
                    Ok(path) => info!(path = %path.display(), "daily backup rotated"),
                    Err(e) => warn!(error = %e, "backup rotation failed"),
                }
                match job_store.prune_finished(retention_days) {
                    Ok(0) => {}
                    Ok(pruned) => info!(pruned, "old jobs pruned"),
                    Err(e) => warn!(error = %e, "job pruning failed"),
                }
                if let Err(e) = db.checkpoint() {
                    warn!(error = %e, "WAL checkpoint failed");
                }
            }
        });
    }

    let state = Arc::new(AppState::new(
        Arc::clone(&config),
        authenticator,
        db,
        Arc::clone(&events),
        Arc::clone(&jobs),
        job_store,
        wanted_store,
        history,
        profiles,
        pipeline,
        provider_engine,
        translator,
        reconciler,
        Arc::clone(&scheduler),
        transcriber.clone(),
        backups,
    ));

    let app = create_router(state);
    let addr = SocketAddr::new(effective.server.host, effective.server.port);
    info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutting down...");
    scheduler.stop();
    jobs.stop().await;
    if let Some(queue) = &transcriber {
        queue.stop();
    }
    info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
