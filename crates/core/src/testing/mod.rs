//! Mock implementations of the external-service traits.
//!
//! These let the end-to-end tests drive the full acquisition path without a
//! network, a provider account, an LLM, or ffmpeg on the PATH.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::library::{ExpectedItem, LibraryError, LibrarySource};
use crate::probe::{MediaProber, MediaStream, ProbeCacheRepo, ProbeError};
use crate::provider::{
    ConfigField, ProviderError, ProviderResult, RateLimit, SubtitleProvider, VideoQuery,
};
use crate::subtitle::SubtitleFormat;
use crate::translate::{BatchRequest, TranslateError, TranslationBackend};

/// Provider returning a fixed result set and payload.
pub struct MockProvider {
    pub name: &'static str,
    pub results: Mutex<Vec<ProviderResult>>,
    pub payload: Vec<u8>,
    pub search_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub fail_search: bool,
}

impl MockProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            results: Mutex::new(Vec::new()),
            payload: b"1\n00:00:01,000 --> 00:00:02,000\nmock line\n\n".to_vec(),
            search_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            fail_search: false,
        }
    }

    /// A ready-made candidate for this provider.
    pub fn result(
        name: &str,
        language: &str,
        format: SubtitleFormat,
        matches: &[&str],
    ) -> ProviderResult {
        ProviderResult {
            provider: name.to_string(),
            id: "mock-1".to_string(),
            language: language.to_string(),
            format,
            filename: Some(format!("mock.{}.{}", language, format.extension())),
            download_ref: "mock-ref".to_string(),
            release_info: None,
            hearing_impaired: false,
            forced: false,
            machine_translated: false,
            matches: matches.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        }
    }

    pub fn push_result(&self, result: ProviderResult) {
        self.results.lock().unwrap().push(result);
    }
}

#[async_trait]
impl SubtitleProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn languages(&self) -> Vec<String> {
        vec!["*".to_string()]
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests: 1000,
            window_seconds: 60,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn max_retries(&self) -> u32 {
        0
    }

    fn config_fields(&self) -> Vec<ConfigField> {
        Vec::new()
    }

    async fn search(&self, _query: &VideoQuery) -> Result<Vec<ProviderResult>, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search {
            return Err(ProviderError::Transient {
                provider: self.name.to_string(),
                message: "mock failure".to_string(),
            });
        }
        Ok(self.results.lock().unwrap().clone())
    }

    async fn download(&self, _result: &ProviderResult) -> Result<Vec<u8>, ProviderError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Backend that marks lines with a prefix, keeping `\n` breaks.
pub struct MockTranslationBackend {
    pub prefix: &'static str,
    pub calls: AtomicUsize,
}

impl MockTranslationBackend {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranslationBackend for MockTranslationBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        15
    }

    async fn translate_batch(
        &self,
        batch: &BatchRequest,
    ) -> Result<Vec<String>, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(batch
            .lines
            .iter()
            .map(|line| format!("{} {line}", self.prefix))
            .collect())
    }

    async fn health_check(&self) -> Result<(), TranslateError> {
        Ok(())
    }
}

/// Prober serving a fixed stream list.
pub struct MockProber {
    pub streams: Vec<MediaStream>,
    pub calls: AtomicUsize,
}

impl MockProber {
    pub fn new(streams: Vec<MediaStream>) -> Self {
        Self {
            streams,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl MediaProber for MockProber {
    fn engine(&self) -> &'static str {
        "mock"
    }

    async fn probe(&self, _path: &Path) -> Result<Vec<MediaStream>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.streams.clone())
    }
}

/// In-memory probe cache.
#[derive(Default)]
pub struct MemoryProbeCache {
    entries: Mutex<std::collections::HashMap<std::path::PathBuf, (i64, Vec<MediaStream>)>>,
}

impl ProbeCacheRepo for MemoryProbeCache {
    fn get(&self, path: &Path, mtime: i64) -> Option<Vec<MediaStream>> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .filter(|(m, _)| *m == mtime)
            .map(|(_, s)| s.clone())
    }

    fn put(&self, path: &Path, mtime: i64, streams: &[MediaStream]) {
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), (mtime, streams.to_vec()));
    }

    fn invalidate(&self, path: &Path) {
        self.entries.lock().unwrap().remove(path);
    }
}

/// Library source over a fixed item list.
pub struct MockLibrarySource {
    pub items: Mutex<Vec<ExpectedItem>>,
}

impl MockLibrarySource {
    pub fn new(items: Vec<ExpectedItem>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }
}

#[async_trait]
impl LibrarySource for MockLibrarySource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn expected_items(&self) -> Result<Vec<ExpectedItem>, LibraryError> {
        Ok(self.items.lock().unwrap().clone())
    }
}
