//! Shared test composition: the full application wired over mocks.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sublarr_core::testing::{MockProber, MockProvider, MockTranslationBackend};
use sublarr_core::{
    create_authenticator, AcquisitionPipeline, BackupManager, Config, ConfigHandle, Db, EventBus,
    FolderScanner, JobQueue, JobQueueConfig, LibrarySource, PipelineConfig, ProbeService,
    ProviderEngine, ProviderEngineConfig, Reconciler, ReconcilerConfig, SqliteConfigStore,
    SqliteHealthStore, SqliteHistoryStore, SqliteJobStore, SqliteProbeCache, SqliteProfileStore,
    SqliteWantedStore, SubtitleProvider, TranslationBackend, TranslationEngine,
    TranslationEngineConfig, WantedScheduler, WantedSchedulerConfig,
};
use sublarr_server::api::create_router;
use sublarr_server::state::AppState;

pub struct TestApp {
    pub dir: tempfile::TempDir,
    pub router: Router,
}

pub async fn build_app(api_key: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let media_root = dir.path().join("media");
    std::fs::create_dir_all(&media_root).unwrap();

    let mut config = Config::default();
    config.server.api_key = api_key.to_string();
    config.media.root = media_root.clone();
    config.media.languages = vec!["de".to_string()];
    config.storage.data_dir = dir.path().join("data");
    std::fs::create_dir_all(&config.storage.data_dir).unwrap();

    let db = Db::open(&config.storage.database_path()).unwrap();
    let job_store = Arc::new(SqliteJobStore::new(db.clone()));
    let wanted_store = Arc::new(SqliteWantedStore::new(db.clone()));
    let history = Arc::new(SqliteHistoryStore::new(db.clone()));
    let health = Arc::new(SqliteHealthStore::new(db.clone()));
    let profiles = Arc::new(SqliteProfileStore::new(db.clone()));
    let config_store = Arc::new(SqliteConfigStore::new(db.clone()));
    let probe_cache = Arc::new(SqliteProbeCache::new(db.clone()));

    let handle = ConfigHandle::new(config.clone(), config_store);
    let authenticator = Arc::from(create_authenticator(&config.server.api_key));
    let events = Arc::new(EventBus::default());

    let provider: Arc<dyn SubtitleProvider> = Arc::new(MockProvider::new("mock"));
    let providers = Arc::new(
        ProviderEngine::new(
            ProviderEngineConfig {
                deadline_slack: Duration::from_millis(100),
                ..Default::default()
            },
            vec![provider],
            health.clone(),
            Arc::clone(&events),
        )
        .await,
    );
    let backend: Arc<dyn TranslationBackend> = Arc::new(MockTranslationBackend::new("DE"));
    let translator = Arc::new(TranslationEngine::new(
        TranslationEngineConfig {
            retry_backoff_base: Duration::from_millis(1),
            ..Default::default()
        },
        vec![backend],
        health,
    ));
    let probe = Arc::new(ProbeService::new(
        Arc::new(MockProber::empty()),
        probe_cache,
    ));

    let pipeline = Arc::new(AcquisitionPipeline::new(
        PipelineConfig::new(&media_root),
        Arc::clone(&probe),
        Arc::clone(&providers),
        Arc::clone(&translator),
        history.clone(),
        Arc::clone(&events),
    ));

    let jobs = JobQueue::new(
        JobQueueConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        },
        job_store.clone(),
        wanted_store.clone(),
        Arc::clone(&pipeline),
        Arc::clone(&events),
    );
    Arc::clone(&jobs).start();

    let library: Arc<dyn LibrarySource> = Arc::new(FolderScanner::new(&media_root));
    let reconciler = Arc::new(Reconciler::new(
        ReconcilerConfig {
            default_languages: vec!["de".to_string()],
            ..Default::default()
        },
        library,
        probe,
        wanted_store.clone(),
        profiles.clone(),
        Arc::clone(&events),
    ));
    let scheduler = WantedScheduler::new(
        WantedSchedulerConfig::default(),
        Arc::clone(&reconciler),
        wanted_store.clone(),
        Arc::clone(&jobs),
    );
    let backups = Arc::new(BackupManager::new(db.clone(), dir.path().join("backups")));

    let state = Arc::new(AppState::new(
        handle,
        authenticator,
        db,
        events,
        jobs,
        job_store,
        wanted_store,
        history,
        profiles,
        pipeline,
        providers,
        translator,
        reconciler,
        scheduler,
        None,
        backups,
    ));

    TestApp {
        dir,
        router: create_router(state),
    }
}
