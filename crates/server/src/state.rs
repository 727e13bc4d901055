//! Shared application state.

use std::sync::Arc;

use sublarr_core::{
    AcquisitionPipeline, Authenticator, BackupManager, ConfigHandle, Db, EventBus, HistoryStore,
    JobQueue, JobStore, ProfileStore, ProviderEngine, Reconciler, TranscribeQueue,
    TranslationEngine, WantedScheduler, WantedStore,
};

/// Everything the handlers need, wired once in `main`.
pub struct AppState {
    config: Arc<ConfigHandle>,
    authenticator: Arc<dyn Authenticator>,
    db: Db,
    events: Arc<EventBus>,
    jobs: Arc<JobQueue>,
    job_store: Arc<dyn JobStore>,
    wanted_store: Arc<dyn WantedStore>,
    history: Arc<dyn HistoryStore>,
    profiles: Arc<dyn ProfileStore>,
    pipeline: Arc<AcquisitionPipeline>,
    providers: Arc<ProviderEngine>,
    translator: Arc<TranslationEngine>,
    reconciler: Arc<Reconciler>,
    scheduler: Arc<WantedScheduler>,
    transcriber: Option<Arc<TranscribeQueue>>,
    backups: Arc<BackupManager>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ConfigHandle>,
        authenticator: Arc<dyn Authenticator>,
        db: Db,
        events: Arc<EventBus>,
        jobs: Arc<JobQueue>,
        job_store: Arc<dyn JobStore>,
        wanted_store: Arc<dyn WantedStore>,
        history: Arc<dyn HistoryStore>,
        profiles: Arc<dyn ProfileStore>,
        pipeline: Arc<AcquisitionPipeline>,
        providers: Arc<ProviderEngine>,
        translator: Arc<TranslationEngine>,
        reconciler: Arc<Reconciler>,
        scheduler: Arc<WantedScheduler>,
        transcriber: Option<Arc<TranscribeQueue>>,
        backups: Arc<BackupManager>,
    ) -> Self {
        Self {
            config,
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
            transcriber,
            backups,
        }
    }

    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.job_store
    }

    pub fn wanted_store(&self) -> &Arc<dyn WantedStore> {
        &self.wanted_store
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn profiles(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    pub fn pipeline(&self) -> &Arc<AcquisitionPipeline> {
        &self.pipeline
    }

    pub fn providers(&self) -> &Arc<ProviderEngine> {
        &self.providers
    }

    pub fn translator(&self) -> &Arc<TranslationEngine> {
        &self.translator
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &Arc<WantedScheduler> {
        &self.scheduler
    }

    pub fn transcriber(&self) -> Option<&Arc<TranscribeQueue>> {
        self.transcriber.as_ref()
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }
}
