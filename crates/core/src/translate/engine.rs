//! Batching, validation, retry and backend failover.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::store::HealthStore;

use super::types::{
    BatchRequest, TranslateError, TranslationBackend, TranslationRequest, TranslationResult,
};
use super::validate::{validate_line, LineIssue};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct TranslationEngineConfig {
    /// Timeout per backend request.
    pub request_timeout: Duration,
    /// Chunk retries before dropping to single-line mode.
    pub max_chunk_retries: u32,
    /// First retry delay; doubles per attempt (5 s, 10 s, 20 s).
    pub retry_backoff_base: Duration,
    /// Consecutive failures before a backend is auto-disabled.
    pub auto_disable_threshold: u32,
    pub auto_disable_cooldown: Duration,
}

impl Default for TranslationEngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(90),
            max_chunk_retries: 3,
            retry_backoff_base: Duration::from_secs(5),
            auto_disable_threshold: 10,
            auto_disable_cooldown: Duration::from_secs(30 * 60),
        }
    }
}

/// The translation engine.
pub struct TranslationEngine {
    config: TranslationEngineConfig,
    backends: Vec<Arc<dyn TranslationBackend>>,
    health: Arc<dyn HealthStore>,
}

impl TranslationEngine {
    pub fn new(
        config: TranslationEngineConfig,
        backends: Vec<Arc<dyn TranslationBackend>>,
        health: Arc<dyn HealthStore>,
    ) -> Self {
        Self {
            config,
            backends,
            health,
        }
    }

    pub fn backends(&self) -> &[Arc<dyn TranslationBackend>] {
        &self.backends
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<dyn TranslationBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    /// Translate a request, walking the fallback chain on transient errors.
    ///
    /// Guarantees `translated_lines.len() == request.lines.len()` on success.
    pub async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResult, TranslateError> {
        if request.lines.is_empty() {
            return Ok(TranslationResult {
                translated_lines: Vec::new(),
                backend_used: "none".to_string(),
                per_line_scores: None,
            });
        }

        let chain = self.resolve_chain(request);
        if chain.is_empty() {
            return Err(TranslateError::NoBackend {
                src_lang: request.source_language.clone(),
                target: request.target_language.clone(),
            });
        }

        let mut last_error = None;
        for backend in chain {
            let name = backend.name();
            let started = Instant::now();
            match self.translate_with(backend.as_ref(), request).await {
                Ok(lines) => {
                    self.record_success(name, started.elapsed());
                    info!(
                        backend = name,
                        lines = lines.len(),
                        "translation completed"
                    );
                    return Ok(TranslationResult {
                        translated_lines: lines,
                        backend_used: name.to_string(),
                        per_line_scores: None,
                    });
                }
                Err(e) if e.is_transient() => {
                    warn!(backend = name, error = %e, "backend failed, trying next in chain");
                    self.record_failure(name);
                    last_error = Some(e);
                }
                Err(TranslateError::BackendAuthInvalid(backend_name)) => {
                    // Broken credentials do not heal with retries; skip the
                    // backend and move on.
                    warn!(backend = name, "credentials rejected, skipping backend");
                    self.record_failure(name);
                    last_error = Some(TranslateError::BackendAuthInvalid(backend_name));
                }
                Err(e @ TranslateError::LineCountMismatch { .. }) => {
                    warn!(backend = name, error = %e, "backend cannot hold line count");
                    self.record_failure(name);
                    last_error = Some(e);
                }
                Err(e) => {
                    self.record_failure(name);
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or(TranslateError::NoBackend {
            src_lang: request.source_language.clone(),
            target: request.target_language.clone(),
        }))
    }

    fn resolve_chain(&self, request: &TranslationRequest) -> Vec<Arc<dyn TranslationBackend>> {
        let mut names: Vec<String> = Vec::new();
        if let Some(preferred) = &request.preferred_backend {
            names.push(preferred.clone());
        }
        if let Some(chain) = &request.fallback_chain {
            names.extend(chain.iter().cloned());
        }
        if names.is_empty() {
            names.extend(self.backends.iter().map(|b| b.name().to_string()));
        }

        let pair = (
            request.source_language.clone(),
            request.target_language.clone(),
        );
        let mut chain = Vec::new();
        for name in names {
            let Some(backend) = self.backend(&name) else {
                warn!(backend = %name, "unknown backend in chain");
                continue;
            };
            if chain.iter().any(|b: &Arc<dyn TranslationBackend>| b.name() == backend.name()) {
                continue;
            }
            if let Some(pairs) = backend.supported_pairs() {
                if !pairs.contains(&pair) {
                    debug!(backend = %name, "backend does not serve this pair");
                    continue;
                }
            }
            if self.auto_disabled(backend.name()) {
                debug!(backend = %name, "backend auto-disabled");
                continue;
            }
            chain.push(Arc::clone(backend));
        }
        chain
    }

    fn auto_disabled(&self, name: &str) -> bool {
        match self.health.backend(name) {
            Ok(Some(record)) => record
                .auto_disabled_until
                .map(|until| until > Utc::now())
                .unwrap_or(false),
            _ => false,
        }
    }

    async fn translate_with(
        &self,
        backend: &dyn TranslationBackend,
        request: &TranslationRequest,
    ) -> Result<Vec<String>, TranslateError> {
        let glossary = request
            .glossary
            .as_ref()
            .map(|g| g.resolve(request.series_id))
            .unwrap_or_default();
        let chunk_size = if backend.supports_batch() {
            backend.max_batch_size().max(1)
        } else {
            1
        };

        let mut translated = Vec::with_capacity(request.lines.len());
        for (chunk_index, chunk) in request.lines.chunks(chunk_size).enumerate() {
            if let Some(cancel) = &request.cancel {
                if cancel.load(std::sync::atomic::Ordering::Relaxed) {
                    return Err(TranslateError::Cancelled);
                }
            }
            let offset = chunk_index * chunk_size;
            let lines = self
                .translate_chunk(backend, request, &glossary, chunk, offset)
                .await?;
            translated.extend(lines);
        }

        debug_assert_eq!(translated.len(), request.lines.len());
        Ok(translated)
    }

    /// Translate one chunk: up to `max_chunk_retries` batch attempts with
    /// backoff, then single-line fallback.
    async fn translate_chunk(
        &self,
        backend: &dyn TranslationBackend,
        request: &TranslationRequest,
        glossary: &[(String, String)],
        chunk: &[String],
        offset: usize,
    ) -> Result<Vec<String>, TranslateError> {
        let batch = BatchRequest {
            lines: chunk.to_vec(),
            source_language: request.source_language.clone(),
            target_language: request.target_language.clone(),
            glossary: glossary.to_vec(),
            style_hints: request.style_hints.clone(),
        };

        let mut attempt = 0u32;
        loop {
            match self.call_backend(backend, &batch).await {
                Ok(lines) => {
                    match self.validate_chunk(request, chunk, &lines, offset) {
                        Ok(()) => return Ok(lines),
                        Err(issue) => {
                            debug!(backend = backend.name(), error = %issue, "chunk rejected");
                        }
                    }
                }
                Err(e) if e.is_transient() || matches!(e, TranslateError::LineCountMismatch { .. }) => {
                    debug!(backend = backend.name(), error = %e, attempt, "chunk attempt failed");
                    if e.is_transient() && attempt >= self.config.max_chunk_retries {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }

            attempt += 1;
            if attempt > self.config.max_chunk_retries {
                break;
            }
            let backoff = self.config.retry_backoff_base * 2u32.pow(attempt - 1);
            tokio::time::sleep(backoff).await;
        }

        // Batch mode is not converging; translate the chunk line by line.
        debug!(backend = backend.name(), "falling back to single-line mode");
        let mut out = Vec::with_capacity(chunk.len());
        for (i, line) in chunk.iter().enumerate() {
            let single = BatchRequest {
                lines: vec![line.clone()],
                source_language: request.source_language.clone(),
                target_language: request.target_language.clone(),
                glossary: glossary.to_vec(),
                style_hints: request.style_hints.clone(),
            };
            let result = self.call_backend(backend, &single).await?;
            let translated = result.into_iter().next().ok_or(
                TranslateError::LineCountMismatch {
                    expected: 1,
                    actual: 0,
                },
            )?;
            match validate_line(line, &translated, &request.target_language) {
                Some(LineIssue::Hallucination) | Some(LineIssue::Passthrough) => {
                    crate::metrics::HALLUCINATIONS_REJECTED.inc();
                    return Err(TranslateError::HallucinationDetected {
                        line_index: offset + i,
                    });
                }
                Some(LineIssue::SuspiciousLength) => {
                    warn!(line = offset + i, "translation length out of expected range");
                }
                None => {}
            }
            out.push(translated);
        }
        Ok(out)
    }

    async fn call_backend(
        &self,
        backend: &dyn TranslationBackend,
        batch: &BatchRequest,
    ) -> Result<Vec<String>, TranslateError> {
        let lines = timeout(self.config.request_timeout, backend.translate_batch(batch))
            .await
            .map_err(|_| TranslateError::BackendTimeout {
                backend: backend.name().to_string(),
                timeout: self.config.request_timeout,
            })??;
        if lines.len() != batch.lines.len() {
            return Err(TranslateError::LineCountMismatch {
                expected: batch.lines.len(),
                actual: lines.len(),
            });
        }
        Ok(lines)
    }

    fn validate_chunk(
        &self,
        request: &TranslationRequest,
        chunk: &[String],
        lines: &[String],
        offset: usize,
    ) -> Result<(), TranslateError> {
        for (i, (source, translated)) in chunk.iter().zip(lines.iter()).enumerate() {
            match validate_line(source, translated, &request.target_language) {
                Some(LineIssue::Hallucination) | Some(LineIssue::Passthrough) => {
                    crate::metrics::HALLUCINATIONS_REJECTED.inc();
                    return Err(TranslateError::HallucinationDetected {
                        line_index: offset + i,
                    });
                }
                Some(LineIssue::SuspiciousLength) => {
                    warn!(line = offset + i, "translation length out of expected range");
                }
                None => {}
            }
        }
        Ok(())
    }

    fn record_success(&self, name: &str, elapsed: Duration) {
        if let Err(e) = self.health.backend_success(name, elapsed.as_millis() as u64) {
            warn!(backend = name, error = %e, "health update failed");
        }
    }

    fn record_failure(&self, name: &str) {
        crate::metrics::TRANSLATION_REQUESTS
            .with_label_values(&[name, "error"])
            .inc();
        let consecutive = match self.health.backend_failure(name) {
            Ok(count) => count,
            Err(e) => {
                warn!(backend = name, error = %e, "health update failed");
                return;
            }
        };
        if consecutive >= self.config.auto_disable_threshold {
            let until = Utc::now()
                + chrono::Duration::from_std(self.config.auto_disable_cooldown)
                    .unwrap_or_else(|_| chrono::Duration::minutes(30));
            info!(backend = name, until = %until, "backend auto-disabled");
            if let Err(e) = self.health.set_backend_disabled_until(name, Some(until)) {
                warn!(backend = name, error = %e, "health update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::store::{Db, SqliteHealthStore};

    /// Scripted backend: pops one behavior per `translate_batch` call.
    struct ScriptedBackend {
        name: &'static str,
        script: Mutex<Vec<Behavior>>,
        calls: AtomicUsize,
        batch: bool,
        batch_size: usize,
    }

    #[derive(Clone)]
    enum Behavior {
        Echo(&'static str),
        ExtraLine,
        MissingLine,
        Cjk,
        Transient,
        AuthError,
    }

    impl ScriptedBackend {
        fn new(name: &'static str, script: Vec<Behavior>) -> Self {
            Self {
                name,
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                batch: true,
                batch_size: 15,
            }
        }

        fn always(name: &'static str, behavior: Behavior) -> Self {
            Self::new(name, vec![behavior; 64])
        }
    }

    #[async_trait]
    impl TranslationBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports_batch(&self) -> bool {
            self.batch
        }

        fn max_batch_size(&self) -> usize {
            self.batch_size
        }

        async fn translate_batch(
            &self,
            batch: &BatchRequest,
        ) -> Result<Vec<String>, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let behavior = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    Behavior::Echo("übersetzt")
                } else {
                    script.remove(0)
                }
            };
            match behavior {
                Behavior::Echo(prefix) => Ok(batch
                    .lines
                    .iter()
                    .enumerate()
                    .map(|(i, _)| format!("{prefix} {i}"))
                    .collect()),
                Behavior::ExtraLine => {
                    let mut lines: Vec<String> =
                        batch.lines.iter().map(|_| "ok".to_string()).collect();
                    lines.push("extra".to_string());
                    Ok(lines)
                }
                Behavior::MissingLine => {
                    let mut lines: Vec<String> =
                        batch.lines.iter().map(|_| "ok".to_string()).collect();
                    lines.pop();
                    Ok(lines)
                }
                Behavior::Cjk => Ok(batch.lines.iter().map(|_| "漢字".to_string()).collect()),
                Behavior::Transient => Err(TranslateError::Transient {
                    backend: self.name.to_string(),
                    message: "503".to_string(),
                }),
                Behavior::AuthError => {
                    Err(TranslateError::BackendAuthInvalid(self.name.to_string()))
                }
            }
        }

        async fn health_check(&self) -> Result<(), TranslateError> {
            Ok(())
        }
    }

    fn engine_with(backends: Vec<Arc<dyn TranslationBackend>>) -> TranslationEngine {
        let config = TranslationEngineConfig {
            retry_backoff_base: Duration::from_millis(1),
            ..Default::default()
        };
        TranslationEngine::new(
            config,
            backends,
            Arc::new(SqliteHealthStore::new(Db::in_memory().unwrap())),
        )
    }

    fn request(lines: &[&str]) -> TranslationRequest {
        TranslationRequest::new(
            lines.iter().map(|s| s.to_string()).collect(),
            "en",
            "de",
        )
    }

    #[tokio::test]
    async fn test_line_count_invariant_holds() {
        let backend = Arc::new(ScriptedBackend::new("a", vec![Behavior::Echo("x")]));
        let engine = engine_with(vec![backend]);
        let lines = ["one", "two", "three"];
        let result = engine.translate(&request(&lines)).await.unwrap();
        assert_eq!(result.translated_lines.len(), lines.len());
        assert_eq!(result.backend_used, "a");
    }

    #[tokio::test]
    async fn test_empty_request_short_circuits() {
        let engine = engine_with(vec![]);
        let result = engine.translate(&request(&[])).await.unwrap();
        assert!(result.translated_lines.is_empty());
    }

    #[tokio::test]
    async fn test_extra_line_repaired_by_retry() {
        // First attempt returns N+1, second attempt is clean.
        let backend = Arc::new(ScriptedBackend::new(
            "a",
            vec![Behavior::ExtraLine, Behavior::Echo("gut")],
        ));
        let engine = engine_with(vec![backend.clone()]);
        let result = engine.translate(&request(&["one", "two"])).await.unwrap();
        assert_eq!(result.translated_lines.len(), 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_mismatch_falls_back_to_single_line() {
        // Four failing batch attempts, then per-line calls succeed.
        let backend = Arc::new(ScriptedBackend::new(
            "a",
            vec![
                Behavior::MissingLine,
                Behavior::MissingLine,
                Behavior::MissingLine,
                Behavior::MissingLine,
                Behavior::Echo("eins"),
                Behavior::Echo("zwei"),
            ],
        ));
        let engine = engine_with(vec![backend.clone()]);
        let result = engine.translate(&request(&["one", "two"])).await.unwrap();
        assert_eq!(result.translated_lines.len(), 2);
        // 4 batch attempts + 2 single-line calls.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_hallucination_fails_after_single_line_retry() {
        let backend = Arc::new(ScriptedBackend::always("a", Behavior::Cjk));
        let engine = engine_with(vec![backend]);
        let err = engine.translate(&request(&["hello there"])).await.unwrap_err();
        assert!(matches!(
            err,
            TranslateError::HallucinationDetected { line_index: 0 }
        ));
    }

    #[tokio::test]
    async fn test_transient_failure_falls_over_to_next_backend() {
        let bad = Arc::new(ScriptedBackend::always("bad", Behavior::Transient));
        let good = Arc::new(ScriptedBackend::new("good", vec![Behavior::Echo("gut")]));
        let engine = engine_with(vec![bad, good]);
        let result = engine.translate(&request(&["one"])).await.unwrap();
        assert_eq!(result.backend_used, "good");
    }

    #[tokio::test]
    async fn test_auth_failure_skips_backend_without_retry() {
        let locked = Arc::new(ScriptedBackend::always("locked", Behavior::AuthError));
        let good = Arc::new(ScriptedBackend::new("good", vec![Behavior::Echo("gut")]));
        let engine = engine_with(vec![locked.clone(), good]);
        let result = engine.translate(&request(&["one"])).await.unwrap();
        assert_eq!(result.backend_used, "good");
        assert_eq!(locked.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preferred_backend_goes_first() {
        let a = Arc::new(ScriptedBackend::new("a", vec![Behavior::Echo("a")]));
        let b = Arc::new(ScriptedBackend::new("b", vec![Behavior::Echo("b")]));
        let engine = engine_with(vec![a, b]);
        let mut req = request(&["one"]);
        req.preferred_backend = Some("b".to_string());
        let result = engine.translate(&req).await.unwrap();
        assert_eq!(result.backend_used, "b");
    }

    #[tokio::test]
    async fn test_all_backends_down_reports_last_error() {
        let a = Arc::new(ScriptedBackend::always("a", Behavior::Transient));
        let b = Arc::new(ScriptedBackend::always("b", Behavior::Transient));
        let engine = engine_with(vec![a, b]);
        let err = engine.translate(&request(&["one"])).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unknown_chain_entries_are_skipped() {
        let good = Arc::new(ScriptedBackend::new("good", vec![Behavior::Echo("gut")]));
        let engine = engine_with(vec![good]);
        let mut req = request(&["one"]);
        req.preferred_backend = Some("ghost".to_string());
        req.fallback_chain = Some(vec!["good".to_string()]);
        let result = engine.translate(&req).await.unwrap();
        assert_eq!(result.backend_used, "good");
    }
}
