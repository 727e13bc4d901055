//! Configuration schema.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub wanted: WantedConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub media_server: MediaServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Empty disables authentication.
    #[serde(default)]
    pub api_key: String,
    /// Minutes to delay upstream webhook processing.
    #[serde(default = "default_webhook_delay")]
    pub webhook_delay_minutes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: String::new(),
            webhook_delay_minutes: default_webhook_delay(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8096
}

fn default_webhook_delay() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding the database, backups and logs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/config")
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("sublarr.db")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    #[serde(default = "default_media_root")]
    pub root: PathBuf,
    /// Languages wanted when no profile applies.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    /// Assumed source language for translation.
    #[serde(default = "default_source_language")]
    pub source_language: String,
    #[serde(default)]
    pub track_forced: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: default_media_root(),
            languages: default_languages(),
            source_language: default_source_language(),
            track_forced: false,
        }
    }
}

fn default_media_root() -> PathBuf {
    PathBuf::from("/media")
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}

fn default_source_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// `ffprobe` or `mediainfo`; both fill the same cache.
    #[serde(default = "default_probe_engine")]
    pub engine: String,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            engine: default_probe_engine(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_probe_engine() -> String {
    "ffprobe".to_string()
}

fn default_probe_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub opensubtitles: Option<crate::provider::providers::OpenSubtitlesConfig>,
    #[serde(default)]
    pub jimaku: Option<crate::provider::providers::JimakuConfig>,
    #[serde(default)]
    pub podnapisi: Option<crate::provider::providers::PodnapisiConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TranslationConfig {
    /// Backend tried first.
    #[serde(default)]
    pub preferred: Option<String>,
    /// Remaining fallback order.
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    #[serde(default)]
    pub ollama: Option<crate::translate::backends::OllamaConfig>,
    #[serde(default)]
    pub openai: Option<crate::translate::backends::OpenAiConfig>,
    #[serde(default)]
    pub deepl: Option<crate::translate::backends::DeepLConfig>,
    #[serde(default)]
    pub libretranslate: Option<crate::translate::backends::LibreTranslateConfig>,
    #[serde(default)]
    pub google: Option<crate::translate::backends::GoogleTranslateConfig>,
    /// Global glossary entries (`source term -> target term`).
    #[serde(default)]
    pub glossary: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `whisper-cli` or `http`.
    #[serde(default = "default_transcribe_backend")]
    pub backend: String,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: default_transcribe_backend(),
            model_path: None,
            api_url: None,
            api_key: None,
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_transcribe_backend() -> String {
    "whisper-cli".to_string()
}

fn default_min_confidence() -> f32 {
    0.6
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WantedConfig {
    #[serde(default = "default_rescan_hours")]
    pub rescan_interval_hours: u64,
    #[serde(default = "default_batch_hours")]
    pub batch_search_interval_hours: u64,
    #[serde(default = "default_full_sweep")]
    pub full_sweep_every: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for WantedConfig {
    fn default() -> Self {
        Self {
            rescan_interval_hours: default_rescan_hours(),
            batch_search_interval_hours: default_batch_hours(),
            full_sweep_every: default_full_sweep(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_rescan_hours() -> u64 {
    6
}

fn default_batch_hours() -> u64 {
    24
}

fn default_full_sweep() -> u32 {
    6
}

fn default_max_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_retention_days() -> i64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// Weight overrides for episode scoring.
    #[serde(default)]
    pub episode: HashMap<String, u32>,
    /// Weight overrides for movie scoring.
    #[serde(default)]
    pub movie: HashMap<String, u32>,
    #[serde(default = "default_upgrade_delta")]
    pub upgrade_min_delta: u32,
    #[serde(default = "default_upgrade_window")]
    pub upgrade_window_days: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            episode: HashMap::new(),
            movie: HashMap::new(),
            upgrade_min_delta: default_upgrade_delta(),
            upgrade_window_days: default_upgrade_window(),
        }
    }
}

fn default_upgrade_delta() -> u32 {
    10
}

fn default_upgrade_window() -> i64 {
    7
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MediaServerConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Validate cross-field constraints the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.media.languages.is_empty() {
        return Err(ConfigError::Invalid(
            "media.languages must name at least one language".to_string(),
        ));
    }
    for lang in config
        .media
        .languages
        .iter()
        .chain(std::iter::once(&config.media.source_language))
    {
        if lang.len() != 2 || !lang.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(ConfigError::Invalid(format!(
                "'{lang}' is not an ISO 639-1 language code"
            )));
        }
    }
    if !matches!(config.probe.engine.as_str(), "ffprobe" | "mediainfo") {
        return Err(ConfigError::Invalid(format!(
            "probe.engine must be 'ffprobe' or 'mediainfo', got '{}'",
            config.probe.engine
        )));
    }
    if config.transcription.enabled {
        match config.transcription.backend.as_str() {
            "whisper-cli" => {
                if config.transcription.model_path.is_none() {
                    return Err(ConfigError::Invalid(
                        "transcription.model_path is required for whisper-cli; \
                         point it at a ggml model file"
                            .to_string(),
                    ));
                }
            }
            "http" => {
                if config.transcription.api_url.is_none() {
                    return Err(ConfigError::Invalid(
                        "transcription.api_url is required for the http backend".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "transcription.backend must be 'whisper-cli' or 'http', got '{other}'"
                )))
            }
        }
    }
    if config.jobs.workers == 0 {
        return Err(ConfigError::Invalid(
            "jobs.workers must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Config view for API responses: secrets replaced with a mask.
pub fn sanitize(config: &Config) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or_default();
    mask_secrets(&mut value);
    value
}

fn mask_secrets(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let is_secret = key.contains("api_key")
                    || key.contains("password")
                    || key.contains("token");
                if is_secret && child.is_string() {
                    let empty = child.as_str().map(str::is_empty).unwrap_or(true);
                    if !empty {
                        *child = serde_json::Value::String("********".to_string());
                    }
                } else {
                    mask_secrets(child);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                mask_secrets(item);
            }
        }
        _ => {}
    }
}
