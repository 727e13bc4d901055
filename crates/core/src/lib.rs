// Allow some clippy lints that are too noisy for this codebase
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::collapsible_if)]

pub mod auth;
pub mod config;
pub mod events;
pub mod jobs;
pub mod library;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod probe;
pub mod provider;
pub mod store;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod wanted;

/// Mock implementations of the external-service traits for E2E tests.
pub mod testing;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, sanitize, validate_config, Config, ConfigError,
    ConfigHandle,
};
pub use events::{Event, EventBus, EventEnvelope, EventHandler, JobPhase, CATALOG_VERSION};
pub use jobs::{BatchOutcome, JobError, JobPayload, JobQueue, JobQueueConfig};
pub use library::{ExpectedItem, FolderScanner, LibraryError, LibrarySource};
pub use metrics::MetricsCollector;
pub use notify::{
    HttpMediaServerNotifier, MediaServerNotifier, NotifyHandler, WebhookDispatcher,
    WebhookDispatcherConfig,
};
pub use pipeline::{
    AcquireOutcome, AcquireRequest, AcquisitionPipeline, PipelineConfig, PipelineError,
    ProgressFn,
};
pub use probe::{
    FfprobeProber, MediaInfoProber, MediaProber, MediaStream, ProbeCacheRepo, ProbeError,
    ProbeService, StreamKind,
};
pub use provider::{
    compute_file_hash, BreakerState, CircuitBreaker, ConfigField, ExternalIds, ProviderEngine,
    ProviderEngineConfig, ProviderError, ProviderResult, RateLimit, ScoredResult,
    SubtitleProvider, VideoQuery,
};
pub use store::{
    ArtifactSource, BackupManager, Db, DownloadRecord, HistoryStore, Job, JobFilter, JobKind,
    JobState, JobStore, LanguageProfile, MediaKind, ProfileStore, ProviderHealthRecord,
    SqliteConfigStore, SqliteHealthStore, SqliteHistoryStore, SqliteJobStore, SqliteProbeCache,
    SqliteProfileStore, SqliteWantedStore, StoreError, SubtitleType, WantedItem, WantedStatus,
    WantedStore, WantedUpsert,
};
pub use subtitle::{AssFile, SrtFile, StyleClass, SubtitleError, SubtitleFormat};
pub use transcribe::{
    HttpTranscriptionBackend, TranscribeError, TranscribePriority, TranscribeQueue,
    TranscribeQueueConfig, TranscriptionBackend, WhisperCliBackend,
};
pub use translate::{
    Glossary, TranslateError, TranslationBackend, TranslationEngine, TranslationEngineConfig,
    TranslationRequest, TranslationResult,
};
pub use wanted::{
    Reconciler, ReconcilerConfig, ScanSummary, WantedError, WantedScheduler,
    WantedSchedulerConfig,
};
