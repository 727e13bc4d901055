//! Provider fan-out, resilience and ranking.
//!
//! Every external call runs the same resilience pipeline: rate-limit token →
//! breaker check → timed call with retries → health counter update. Retry
//! logic lives here, not in the providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};
use crate::store::HealthStore;
use crate::subtitle::SubtitleFormat;

use super::archive::extract_subtitle_payload;
use super::breaker::{BreakerDecision, CircuitBreaker};
use super::rate_limit::RateLimiterPool;
use super::score::WeightCache;
use super::types::{
    ProviderError, ProviderResult, ScoredResult, SubtitleProvider, VideoQuery,
};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct ProviderEngineConfig {
    /// Concurrent provider searches within one query.
    pub search_concurrency: usize,
    /// Added to the longest provider timeout to form the search deadline.
    pub deadline_slack: Duration,
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Breaker cooldown before a half-open probe.
    pub breaker_cooldown: Duration,
    /// Auto-disable duration once failures reach twice the threshold.
    pub auto_disable_cooldown: Duration,
    /// Decompressed download size cap.
    pub max_download_bytes: u64,
    /// Cap applied to Retry-After waits.
    pub max_retry_after: Duration,
}

impl Default for ProviderEngineConfig {
    fn default() -> Self {
        Self {
            search_concurrency: 4,
            deadline_slack: Duration::from_secs(5),
            failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
            auto_disable_cooldown: Duration::from_secs(30 * 60),
            max_download_bytes: 10 * 1024 * 1024,
            max_retry_after: Duration::from_secs(60),
        }
    }
}

/// The provider engine.
pub struct ProviderEngine {
    config: ProviderEngineConfig,
    providers: Vec<Arc<dyn SubtitleProvider>>,
    limiter: Arc<RateLimiterPool>,
    breakers: HashMap<&'static str, Arc<CircuitBreaker>>,
    health: Arc<dyn HealthStore>,
    weights: WeightCache,
    events: Arc<EventBus>,
}

impl ProviderEngine {
    pub async fn new(
        config: ProviderEngineConfig,
        providers: Vec<Arc<dyn SubtitleProvider>>,
        health: Arc<dyn HealthStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let limiter = Arc::new(RateLimiterPool::new());
        let mut breakers = HashMap::new();
        for provider in &providers {
            limiter.register(provider.name(), provider.rate_limit()).await;
            breakers.insert(
                provider.name(),
                Arc::new(CircuitBreaker::new(
                    config.failure_threshold,
                    config.breaker_cooldown,
                )),
            );
        }
        Self {
            config,
            providers,
            limiter,
            breakers,
            health,
            weights: WeightCache::new(),
            events,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn SubtitleProvider>] {
        &self.providers
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn SubtitleProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn breaker(&self, name: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(name)
    }

    /// Invalidate the scoring cache (config reload).
    pub fn invalidate_weights(&self) {
        self.weights.invalidate();
    }

    fn auto_disabled(&self, name: &str) -> bool {
        match self.health.provider(name) {
            Ok(Some(record)) => record
                .auto_disabled_until
                .map(|until| until > Utc::now())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Search all eligible providers in parallel and return results sorted
    /// by score descending.
    ///
    /// The fan-out is bounded by `search_concurrency` and the whole search
    /// by the longest provider timeout plus slack; providers that miss the
    /// deadline are aborted and counted as failures.
    pub async fn search(
        &self,
        query: &VideoQuery,
        weight_fingerprint: &str,
        weight_overrides: impl FnOnce() -> (HashMap<String, u32>, HashMap<String, u32>),
    ) -> Vec<ScoredResult> {
        let mut eligible = Vec::new();
        let mut longest_timeout = Duration::from_secs(15);
        for provider in &self.providers {
            let name = provider.name();
            if self.auto_disabled(name) {
                debug!(provider = name, "skipping auto-disabled provider");
                continue;
            }
            let decision = self
                .breakers
                .get(name)
                .map(|b| b.check())
                .unwrap_or(BreakerDecision::Allow);
            if decision == BreakerDecision::Skip {
                debug!(provider = name, "skipping provider with open circuit");
                continue;
            }
            longest_timeout = longest_timeout.max(provider.timeout());
            eligible.push(Arc::clone(provider));
        }

        let deadline = tokio::time::Instant::now() + longest_timeout + self.config.deadline_slack;
        let semaphore = Arc::new(Semaphore::new(self.config.search_concurrency));
        let mut handles = Vec::new();

        for provider in eligible {
            let name = provider.name();
            let semaphore = Arc::clone(&semaphore);
            let limiter = Arc::clone(&self.limiter);
            let query = query.clone();
            let max_retry_after = self.config.max_retry_after;
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                let started = Instant::now();
                let result = Self::call_with_retries(
                    provider.as_ref(),
                    &limiter,
                    max_retry_after,
                    &query,
                )
                .await;
                (started.elapsed(), result)
            });
            handles.push((name, handle));
        }

        let mut results: Vec<ProviderResult> = Vec::new();
        let mut priorities: HashMap<String, u8> = HashMap::new();
        for provider in &self.providers {
            priorities.insert(provider.name().to_string(), provider.priority());
        }

        for (name, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok((elapsed, Ok(found)))) => {
                    self.record_success(name, elapsed);
                    self.events.publish(Event::ProviderSearchCompleted {
                        provider: name.to_string(),
                        results: found.len(),
                        duration_ms: elapsed.as_millis() as u64,
                    });
                    results.extend(found);
                }
                Ok(Ok((_, Err(e)))) => {
                    warn!(provider = name, error = %e, "provider search failed");
                    self.record_failure(name);
                }
                Ok(Err(join_err)) => {
                    warn!(provider = name, error = %join_err, "provider search task panicked");
                }
                Err(_) => {
                    // Deadline hit: cancel the straggler and charge a
                    // failure; faster providers already delivered.
                    handle.abort();
                    warn!(provider = name, "provider search cancelled at deadline");
                    self.record_failure(name);
                }
            }
        }

        let resolved = self.weights.resolve(weight_fingerprint, weight_overrides);
        let table = resolved.for_query(query);
        let mut scored: Vec<ScoredResult> = results
            .into_iter()
            .map(|result| {
                let score = table.score(&result);
                let provider_priority =
                    priorities.get(&result.provider).copied().unwrap_or(u8::MAX);
                ScoredResult {
                    result,
                    score,
                    provider_priority,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.result.format.is_styled().cmp(&a.result.format.is_styled()))
                .then_with(|| a.provider_priority.cmp(&b.provider_priority))
        });
        scored
    }

    /// Download and unpack the subtitle body for a search result.
    pub async fn download(
        &self,
        result: &ProviderResult,
    ) -> Result<(Vec<u8>, SubtitleFormat), ProviderError> {
        let provider = self
            .provider(&result.provider)
            .ok_or_else(|| ProviderError::NotConfigured(result.provider.clone()))?
            .clone();
        let name = provider.name();

        self.limiter.acquire(name).await;
        let started = Instant::now();
        let outcome = timeout(provider.timeout(), provider.download(result)).await;

        let data = match outcome {
            Ok(Ok(data)) => {
                self.record_success(name, started.elapsed());
                data
            }
            Ok(Err(e)) => {
                self.record_failure(name);
                return Err(e);
            }
            Err(_) => {
                self.record_failure(name);
                return Err(ProviderError::Timeout {
                    provider: name.to_string(),
                    timeout: provider.timeout(),
                });
            }
        };

        let (body, format) = extract_subtitle_payload(
            name,
            &data,
            result.filename.as_deref(),
            self.config.max_download_bytes,
        )?;
        info!(
            provider = name,
            bytes = body.len(),
            format = %format,
            "subtitle downloaded"
        );
        Ok((body, format))
    }

    /// Run a provider health check.
    pub async fn test_provider(&self, name: &str) -> Result<(), ProviderError> {
        let provider = self
            .provider(name)
            .ok_or_else(|| ProviderError::NotConfigured(name.to_string()))?;
        timeout(provider.timeout(), provider.health_check())
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: name.to_string(),
                timeout: provider.timeout(),
            })?
    }

    /// Operator reset: closes the breaker and clears auto-disable.
    pub fn reset_provider(&self, name: &str) {
        if let Some(breaker) = self.breakers.get(name) {
            breaker.reset();
        }
        if let Err(e) = self.health.reset_provider(name) {
            warn!(provider = name, error = %e, "failed to reset provider health");
        }
    }

    async fn call_with_retries(
        provider: &dyn SubtitleProvider,
        limiter: &RateLimiterPool,
        max_retry_after: Duration,
        query: &VideoQuery,
    ) -> Result<Vec<ProviderResult>, ProviderError> {
        let name = provider.name();
        let mut attempt = 0u32;
        let mut rate_limit_retried = false;
        loop {
            limiter.acquire(name).await;
            let outcome = timeout(provider.timeout(), provider.search(query)).await;
            let error = match outcome {
                Ok(Ok(results)) => return Ok(results),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout {
                    provider: name.to_string(),
                    timeout: provider.timeout(),
                },
            };

            match &error {
                ProviderError::Auth { .. } => return Err(error),
                ProviderError::RateLimited { retry_after, .. } => {
                    // Honor Retry-After once, capped, then give up.
                    if rate_limit_retried {
                        return Err(error);
                    }
                    rate_limit_retried = true;
                    let wait = retry_after
                        .unwrap_or(Duration::from_secs(5))
                        .min(max_retry_after);
                    tokio::time::sleep(wait).await;
                }
                _ if error.is_transient() && attempt < provider.max_retries() => {
                    attempt += 1;
                    let backoff = Duration::from_millis(500 * 2u64.pow(attempt.min(6)));
                    debug!(provider = name, attempt, "retrying after transient error");
                    tokio::time::sleep(backoff).await;
                }
                _ => return Err(error),
            }
        }
    }

    fn record_success(&self, name: &str, elapsed: Duration) {
        if let Some(breaker) = self.breakers.get(name) {
            breaker.record_success();
            crate::metrics::BREAKER_STATE.with_label_values(&[name]).set(0);
            if let Err(e) = self
                .health
                .set_breaker(name, breaker.state().as_str(), None)
            {
                warn!(provider = name, error = %e, "health update failed");
            }
        }
        if let Err(e) = self.health.provider_success(name, elapsed.as_millis() as u64) {
            warn!(provider = name, error = %e, "health update failed");
        }
    }

    fn record_failure(&self, name: &str) {
        let consecutive = match self.health.provider_failure(name) {
            Ok(count) => count,
            Err(e) => {
                warn!(provider = name, error = %e, "health update failed");
                0
            }
        };
        if let Some(breaker) = self.breakers.get(name) {
            breaker.record_failure();
            let state = breaker.state();
            crate::metrics::BREAKER_STATE
                .with_label_values(&[name])
                .set(match state {
                    super::breaker::BreakerState::Closed => 0,
                    super::breaker::BreakerState::HalfOpen => 1,
                    super::breaker::BreakerState::Open => 2,
                });
            let opened_at = matches!(state, super::breaker::BreakerState::Open)
                .then(Utc::now);
            if let Err(e) = self
                .health
                .set_breaker(name, breaker.state().as_str(), opened_at)
            {
                warn!(provider = name, error = %e, "health update failed");
            }
        }
        // Independent of the breaker: sustained failure parks the provider.
        if consecutive >= 2 * self.config.failure_threshold {
            let until = Utc::now()
                + chrono::Duration::from_std(self.config.auto_disable_cooldown)
                    .unwrap_or_else(|_| chrono::Duration::minutes(30));
            info!(provider = name, until = %until, "provider auto-disabled");
            if let Err(e) = self.health.set_provider_disabled_until(name, Some(until)) {
                warn!(provider = name, error = %e, "health update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::store::{Db, HealthStore as _, SqliteHealthStore};
    use crate::subtitle::SubtitleFormat;

    struct FakeProvider {
        name: &'static str,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
        score_matches: Vec<&'static str>,
        format: SubtitleFormat,
        priority: u8,
    }

    impl FakeProvider {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                delay: Duration::from_millis(0),
                fail: false,
                calls: AtomicUsize::new(0),
                score_matches: vec!["series"],
                format: SubtitleFormat::Srt,
                priority: 50,
            }
        }
    }

    #[async_trait]
    impl SubtitleProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn languages(&self) -> Vec<String> {
            vec!["de".into(), "en".into()]
        }

        fn rate_limit(&self) -> super::super::types::RateLimit {
            super::super::types::RateLimit {
                requests: 100,
                window_seconds: 60,
            }
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(200)
        }

        fn max_retries(&self) -> u32 {
            0
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn config_fields(&self) -> Vec<super::super::types::ConfigField> {
            Vec::new()
        }

        async fn search(
            &self,
            _query: &VideoQuery,
        ) -> Result<Vec<ProviderResult>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::Transient {
                    provider: self.name.to_string(),
                    message: "503".to_string(),
                });
            }
            Ok(vec![ProviderResult {
                provider: self.name.to_string(),
                id: "1".into(),
                language: "de".into(),
                format: self.format,
                filename: None,
                download_ref: "ref".into(),
                release_info: None,
                hearing_impaired: false,
                forced: false,
                machine_translated: false,
                matches: self
                    .score_matches
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<HashSet<_>>(),
            }])
        }

        async fn download(&self, _result: &ProviderResult) -> Result<Vec<u8>, ProviderError> {
            Ok(b"1\n00:00:01,000 --> 00:00:02,000\nHello\n\n".to_vec())
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn health() -> Arc<SqliteHealthStore> {
        Arc::new(SqliteHealthStore::new(Db::in_memory().unwrap()))
    }

    async fn engine_with(providers: Vec<Arc<dyn SubtitleProvider>>) -> ProviderEngine {
        let mut config = ProviderEngineConfig::default();
        config.deadline_slack = Duration::from_millis(100);
        ProviderEngine::new(
            config,
            providers,
            health(),
            Arc::new(EventBus::default()),
        )
        .await
    }

    fn query() -> VideoQuery {
        let mut query = VideoQuery::new("/m/a.mkv", vec!["de".into()]);
        query.season = Some(1);
        query.episode = Some(2);
        query
    }

    #[tokio::test]
    async fn test_search_merges_and_sorts_by_score() {
        let mut strong = FakeProvider::new("strong");
        strong.score_matches = vec!["hash", "series"];
        let weak = FakeProvider::new("weak");
        let engine = engine_with(vec![Arc::new(strong), Arc::new(weak)]).await;

        let results = engine.search(&query(), "fp", || Default::default()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result.provider, "strong");
        assert_eq!(results[0].score, 359 + 180);
        assert_eq!(results[1].score, 180);
    }

    #[tokio::test]
    async fn test_format_bonus_breaks_ties() {
        let mut ass = FakeProvider::new("ass_source");
        ass.format = SubtitleFormat::Ass;
        ass.score_matches = vec![];
        let mut srt = FakeProvider::new("srt_source");
        srt.score_matches = vec!["release_group", "source", "audio_codec", "resolution",
                                 "hearing_impaired", "season"];
        // srt total: 14+7+3+2+1+30 = 57; ass total: 0 + 50 bonus = 50.
        let engine = engine_with(vec![Arc::new(srt), Arc::new(ass)]).await;
        let results = engine.search(&query(), "fp", || Default::default()).await;
        assert_eq!(results[0].result.provider, "srt_source");
        assert_eq!(results[0].score, 57);
        assert_eq!(results[1].score, 50);
    }

    #[tokio::test]
    async fn test_slow_provider_does_not_block_fast_ones() {
        let fast = FakeProvider::new("fast");
        let mut slow = FakeProvider::new("slow");
        slow.delay = Duration::from_secs(60);
        let engine = engine_with(vec![Arc::new(fast), Arc::new(slow)]).await;

        let started = Instant::now();
        let results = engine.search(&query(), "fp", || Default::default()).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result.provider, "fast");

        // The straggler was charged a failure.
        assert_eq!(engine.breaker("slow").unwrap().consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_skips_provider() {
        let mut failing = FakeProvider::new("failing");
        failing.fail = true;
        let failing = Arc::new(failing);
        let engine = engine_with(vec![failing.clone()]).await;

        for _ in 0..5 {
            engine.search(&query(), "fp", || Default::default()).await;
        }
        assert_eq!(
            engine.breaker("failing").unwrap().state(),
            super::super::breaker::BreakerState::Open
        );

        let calls_before = failing.calls.load(Ordering::SeqCst);
        engine.search(&query(), "fp", || Default::default()).await;
        // Open circuit: the provider was not called again.
        assert_eq!(failing.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_auto_disable_after_double_threshold() {
        let mut failing = FakeProvider::new("failing");
        failing.fail = true;
        let engine = engine_with(vec![Arc::new(failing)]).await;

        // Drive failures directly through the health path.
        for _ in 0..10 {
            engine.record_failure("failing");
        }
        assert!(engine.auto_disabled("failing"));

        engine.reset_provider("failing");
        assert!(!engine.auto_disabled("failing"));
    }

    #[tokio::test]
    async fn test_download_unpacks_payload() {
        let provider = FakeProvider::new("p");
        let engine = engine_with(vec![Arc::new(provider)]).await;
        let results = engine.search(&query(), "fp", || Default::default()).await;

        let (body, format) = engine.download(&results[0].result).await.unwrap();
        assert!(body.starts_with(b"1\n"));
        assert_eq!(format, SubtitleFormat::Srt);
    }

    #[tokio::test]
    async fn test_unknown_provider_download_fails() {
        let engine = engine_with(vec![]).await;
        let orphan = ProviderResult {
            provider: "ghost".into(),
            id: "1".into(),
            language: "de".into(),
            format: SubtitleFormat::Srt,
            filename: None,
            download_ref: "ref".into(),
            release_info: None,
            hearing_impaired: false,
            forced: false,
            machine_translated: false,
            matches: HashSet::new(),
        };
        assert!(matches!(
            engine.download(&orphan).await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
