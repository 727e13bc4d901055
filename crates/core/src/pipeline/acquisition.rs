//! The three-case acquisition decision engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus, JobPhase};
use crate::probe::{MediaStream, ProbeService, StreamKind};
use crate::provider::{compute_file_hash, ProviderEngine, ScoredResult, VideoQuery};
use crate::store::{
    ArtifactSource, DownloadInsert, DownloadRecord, HistoryStore, SubtitleType,
};
use crate::subtitle::SubtitleFormat;
use crate::transcribe::{TranscribePriority, TranscribeQueue};
use crate::translate::{Glossary, TranslationEngine};

use super::doc::{translate_ass, translate_srt};
use super::extract::extract_embedded_subtitle;
use super::types::{AcquireOutcome, AcquireRequest, PipelineError, ProgressFn};
use super::writer::{atomic_write, ensure_within_root};

/// Source of runtime scoring-weight overrides:
/// `(config fingerprint, episode overrides, movie overrides)`.
pub type WeightSource =
    Arc<dyn Fn() -> (String, HashMap<String, u32>, HashMap<String, u32>) + Send + Sync>;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub media_root: PathBuf,
    /// Minimum score improvement to replace an existing artifact.
    pub upgrade_min_delta: u32,
    /// Within this window after a download the required delta doubles.
    pub upgrade_window_days: i64,
    pub extract_timeout_secs: u64,
    pub enable_transcription: bool,
}

impl PipelineConfig {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            upgrade_min_delta: 10,
            upgrade_window_days: 7,
            extract_timeout_secs: 120,
            enable_transcription: false,
        }
    }
}

type AcquireKey = (PathBuf, String, SubtitleType);

/// The acquisition pipeline.
///
/// At most one acquisition runs per (path, language, type); concurrent
/// requests for the same target coalesce onto the in-flight one and share
/// its outcome.
pub struct AcquisitionPipeline {
    config: PipelineConfig,
    probe: Arc<ProbeService>,
    providers: Arc<ProviderEngine>,
    translator: Arc<TranslationEngine>,
    history: Arc<dyn HistoryStore>,
    events: Arc<EventBus>,
    transcriber: Option<Arc<TranscribeQueue>>,
    glossary: Option<Glossary>,
    weight_source: WeightSource,
    inflight: Mutex<HashMap<AcquireKey, Arc<OnceCell<AcquireOutcome>>>>,
}

impl AcquisitionPipeline {
    pub fn new(
        config: PipelineConfig,
        probe: Arc<ProbeService>,
        providers: Arc<ProviderEngine>,
        translator: Arc<TranslationEngine>,
        history: Arc<dyn HistoryStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            probe,
            providers,
            translator,
            history,
            events,
            transcriber: None,
            glossary: None,
            weight_source: Arc::new(|| ("default".to_string(), HashMap::new(), HashMap::new())),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<TranscribeQueue>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_glossary(mut self, glossary: Glossary) -> Self {
        self.glossary = Some(glossary);
        self
    }

    pub fn with_weight_source(mut self, source: WeightSource) -> Self {
        self.weight_source = source;
        self
    }

    /// Run one acquisition, coalescing duplicates onto the in-flight run.
    pub async fn acquire(
        &self,
        request: AcquireRequest,
        progress: Option<ProgressFn>,
    ) -> AcquireOutcome {
        let key = (
            request.video_path.clone(),
            request.target_language.clone(),
            request.subtitle_type,
        );
        let (cell, leader) = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                Some(cell) => (Arc::clone(cell), false),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    inflight.insert(key.clone(), Arc::clone(&cell));
                    (cell, true)
                }
            }
        };

        let outcome = cell
            .get_or_init(|| async {
                match self.run(&request, progress.as_ref()).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(
                            path = %request.video_path.display(),
                            language = %request.target_language,
                            error = %e,
                            "acquisition failed"
                        );
                        AcquireOutcome::Failed {
                            code: e.code().to_string(),
                            reason: e.to_string(),
                        }
                    }
                }
            })
            .await
            .clone();

        if leader {
            self.inflight.lock().await.remove(&key);
        }
        outcome
    }

    async fn run(
        &self,
        request: &AcquireRequest,
        progress: Option<&ProgressFn>,
    ) -> Result<AcquireOutcome, PipelineError> {
        let report = |fraction: f32, phase: JobPhase| {
            if let Some(progress) = progress {
                progress(fraction, phase);
            }
        };
        let checkpoint = |request: &AcquireRequest| -> Result<(), PipelineError> {
            if request.cancelled() {
                Err(PipelineError::Cancelled)
            } else {
                Ok(())
            }
        };

        checkpoint(request)?;
        report(0.05, JobPhase::Probe);
        let streams = self.probe.probe(&request.video_path).await;
        let (ass_path, srt_path) = self.target_paths(request);
        ensure_within_root(&ass_path, &self.config.media_root)?;
        let forced = request.subtitle_type == SubtitleType::Forced;

        // Case A: a styled target already exists.
        if !request.force {
            if ass_path.exists() {
                return Ok(AcquireOutcome::Skipped {
                    reason: "target ASS exists".to_string(),
                    path: Some(ass_path.to_string_lossy().to_string()),
                });
            }
            if self
                .find_embedded(&streams, &request.target_language, true, forced)
                .is_some()
            {
                return Ok(AcquireOutcome::Skipped {
                    reason: "embedded target ASS stream exists".to_string(),
                    path: None,
                });
            }
        }

        let query = self.build_query(request).await;

        // Case B: a target SRT exists; try to replace it with styled.
        if !request.force && srt_path.exists() {
            return self
                .upgrade(request, &query, &streams, &ass_path, &srt_path, &report, &checkpoint)
                .await;
        }

        // Case C: nothing usable exists yet.
        self.acquire_fresh(request, &query, &streams, &ass_path, &srt_path, &report, &checkpoint)
            .await
    }

    /// Case B: B1 provider ASS above the gate, B2 translate embedded ASS,
    /// B3 keep the SRT.
    #[allow(clippy::too_many_arguments)]
    async fn upgrade(
        &self,
        request: &AcquireRequest,
        query: &VideoQuery,
        streams: &[MediaStream],
        ass_path: &Path,
        srt_path: &Path,
        report: &impl Fn(f32, JobPhase),
        checkpoint: &impl Fn(&AcquireRequest) -> Result<(), PipelineError>,
    ) -> Result<AcquireOutcome, PipelineError> {
        checkpoint(request)?;
        report(0.15, JobPhase::ProviderSearch);

        let forced = request.subtitle_type == SubtitleType::Forced;
        let candidates = self.search_providers(request, query).await;
        let styled: Vec<&ScoredResult> = candidates
            .iter()
            .filter(|c| c.result.format.is_styled())
            .filter(|c| c.result.language == request.target_language)
            .filter(|c| result_is_forced(&c.result) == forced)
            .collect();

        if let Some(best) = styled.first() {
            let existing = self
                .history
                .latest(&request.video_path.to_string_lossy(), &request.target_language)?;
            if self.upgrade_allowed(existing.as_ref(), best.score) {
                checkpoint(request)?;
                report(0.5, JobPhase::ProviderDownload);
                match self.download_and_write(request, best, ass_path, report).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(e) => {
                        warn!(error = %e, "upgrade download failed, trying embedded source");
                    }
                }
            } else {
                debug!(
                    candidate = best.score,
                    "upgrade gate rejected provider candidate"
                );
            }
        }

        // B2: synthesize styled output from an embedded source-language ASS.
        if let Some(stream) =
            self.find_embedded(streams, &request.source_language, true, false)
        {
            checkpoint(request)?;
            match self
                .translate_embedded(request, stream, SubtitleFormat::Ass, ass_path, report)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => warn!(error = %e, "embedded-source upgrade failed"),
            }
        }

        // B3: the SRT stays.
        Ok(AcquireOutcome::Skipped {
            reason: "existing SRT retained, no better source".to_string(),
            path: Some(srt_path.to_string_lossy().to_string()),
        })
    }

    /// Case C: C1 embedded ASS, C2 embedded/external SRT, C3 provider,
    /// C4 transcription, C5 fail.
    #[allow(clippy::too_many_arguments)]
    async fn acquire_fresh(
        &self,
        request: &AcquireRequest,
        query: &VideoQuery,
        streams: &[MediaStream],
        ass_path: &Path,
        srt_path: &Path,
        report: &impl Fn(f32, JobPhase),
        checkpoint: &impl Fn(&AcquireRequest) -> Result<(), PipelineError>,
    ) -> Result<AcquireOutcome, PipelineError> {
        // C1: embedded source-language ASS.
        if let Some(stream) =
            self.find_embedded(streams, &request.source_language, true, false)
        {
            checkpoint(request)?;
            match self
                .translate_embedded(request, stream, SubtitleFormat::Ass, ass_path, report)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => warn!(error = %e, "embedded ASS translation failed"),
            }
        }

        // C2: embedded source-language SRT, or a sibling external one.
        if let Some(stream) =
            self.find_embedded(streams, &request.source_language, false, false)
        {
            checkpoint(request)?;
            match self
                .translate_embedded(request, stream, SubtitleFormat::Srt, srt_path, report)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => warn!(error = %e, "embedded SRT translation failed"),
            }
        }
        let external_source = sibling_subtitle_path(
            &request.video_path,
            &request.source_language,
            SubtitleFormat::Srt,
        );
        if external_source.exists() {
            checkpoint(request)?;
            report(0.3, JobPhase::Translate);
            let content = tokio::fs::read_to_string(&external_source).await?;
            match self
                .translate_and_write(request, &content, SubtitleFormat::Srt, srt_path, report)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => warn!(error = %e, "external SRT translation failed"),
            }
        }

        // C3: providers, any format.
        checkpoint(request)?;
        report(0.35, JobPhase::ProviderSearch);
        let forced = request.subtitle_type == SubtitleType::Forced;
        let candidates = self.search_providers(request, query).await;
        let usable: Vec<&ScoredResult> = candidates
            .iter()
            .filter(|c| {
                c.result.language == request.target_language
                    || c.result.language == request.source_language
            })
            .filter(|c| result_is_forced(&c.result) == forced)
            .collect();
        if let Some(best) = usable.first() {
            checkpoint(request)?;
            report(0.55, JobPhase::ProviderDownload);
            match self.fetch_candidate(request, best, ass_path, srt_path, report).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => warn!(error = %e, "provider candidate failed"),
            }
        }

        // C4: transcribe the audio track.
        if self.config.enable_transcription {
            if let Some(transcriber) = &self.transcriber {
                checkpoint(request)?;
                report(0.6, JobPhase::Transcribe);
                let srt_content = transcriber
                    .submit(
                        request.video_path.clone(),
                        request.source_language.clone(),
                        TranscribePriority::Wanted,
                    )
                    .await
                    .map_err(|e| PipelineError::Transcribe(e.to_string()))?;
                let outcome = self
                    .translate_and_write(
                        request,
                        &srt_content,
                        SubtitleFormat::Srt,
                        srt_path,
                        report,
                    )
                    .await?;
                // The artifact originates from transcription, not a provider.
                if let AcquireOutcome::Acquired { path, score, .. } = outcome {
                    return Ok(AcquireOutcome::Acquired {
                        source: ArtifactSource::Whisper,
                        path,
                        provider: None,
                        score,
                    });
                }
                return Ok(outcome);
            }
        }

        // C5: nothing worked.
        Err(PipelineError::NoSourceAvailable {
            path: request.video_path.to_string_lossy().to_string(),
            language: request.target_language.clone(),
        })
    }

    async fn search_providers(
        &self,
        _request: &AcquireRequest,
        query: &VideoQuery,
    ) -> Vec<ScoredResult> {
        let weight_source = Arc::clone(&self.weight_source);
        let (fingerprint, episode, movie) = weight_source();
        self.providers
            .search(query, &fingerprint, move || (episode, movie))
            .await
    }

    /// Replace-only-if-better: the candidate must clear the previous score
    /// by `upgrade_min_delta`, doubled for recent downloads.
    fn upgrade_allowed(&self, existing: Option<&DownloadRecord>, candidate: u32) -> bool {
        let Some(existing) = existing else {
            return true;
        };
        let mut delta = self.config.upgrade_min_delta;
        let window = ChronoDuration::days(self.config.upgrade_window_days);
        if existing.downloaded_at + window > Utc::now() {
            delta *= 2;
        }
        candidate > existing.score + delta
    }

    async fn download_and_write(
        &self,
        request: &AcquireRequest,
        candidate: &ScoredResult,
        target: &Path,
        report: &impl Fn(f32, JobPhase),
    ) -> Result<AcquireOutcome, PipelineError> {
        let (body, format) = self.providers.download(&candidate.result).await?;
        let hash = content_hash(&body);
        let path_str = request.video_path.to_string_lossy().to_string();
        if self
            .history
            .contains_hash(&path_str, &request.target_language, &hash)?
        {
            return Ok(AcquireOutcome::Skipped {
                reason: "identical artifact already downloaded".to_string(),
                path: Some(target.to_string_lossy().to_string()),
            });
        }

        report(0.85, JobPhase::Write);
        ensure_within_root(target, &self.config.media_root)?;
        atomic_write(target, &body).await?;

        self.record_history(
            request,
            &candidate.result.provider,
            &candidate.result.id,
            candidate.score,
            format,
            ArtifactSource::Provider,
            &body,
        )?;
        self.events.publish(Event::SubtitleDownloaded {
            file_path: path_str,
            language: request.target_language.clone(),
            provider: candidate.result.provider.clone(),
            score: candidate.score,
        });
        info!(path = %target.display(), provider = %candidate.result.provider, "subtitle acquired");
        Ok(AcquireOutcome::Acquired {
            source: ArtifactSource::Provider,
            path: target.to_string_lossy().to_string(),
            provider: Some(candidate.result.provider.clone()),
            score: Some(candidate.score),
        })
    }

    /// C3 fetch: keep a target-language result, translate a source-language
    /// one.
    async fn fetch_candidate(
        &self,
        request: &AcquireRequest,
        candidate: &ScoredResult,
        ass_path: &Path,
        srt_path: &Path,
        report: &impl Fn(f32, JobPhase),
    ) -> Result<AcquireOutcome, PipelineError> {
        if candidate.result.language == request.target_language {
            let target = if candidate.result.format.is_styled() {
                ass_path
            } else {
                srt_path
            };
            return self.download_and_write(request, candidate, target, report).await;
        }

        // Source-language result: download then translate.
        let (body, format) = self.providers.download(&candidate.result).await?;
        let content = String::from_utf8_lossy(&body).to_string();
        let target = if format.is_styled() { ass_path } else { srt_path };
        self.translate_and_write(request, &content, format, target, report)
            .await
    }

    async fn translate_embedded(
        &self,
        request: &AcquireRequest,
        stream: &MediaStream,
        format: SubtitleFormat,
        target: &Path,
        report: &impl Fn(f32, JobPhase),
    ) -> Result<AcquireOutcome, PipelineError> {
        let content = extract_embedded_subtitle(
            &request.video_path,
            stream.index,
            format,
            self.config.extract_timeout_secs,
        )
        .await?;
        self.translate_and_write(request, &content, format, target, report)
            .await
    }

    async fn translate_and_write(
        &self,
        request: &AcquireRequest,
        content: &str,
        format: SubtitleFormat,
        target: &Path,
        report: &impl Fn(f32, JobPhase),
    ) -> Result<AcquireOutcome, PipelineError> {
        report(0.65, JobPhase::Translate);
        let (translated, line_count, backend) = match format {
            SubtitleFormat::Ass | SubtitleFormat::Ssa => {
                translate_ass(
                    self.translator.as_ref(),
                    content,
                    &request.source_language,
                    &request.target_language,
                    self.glossary.clone(),
                    request.series_id,
                    request.cancel.clone(),
                )
                .await?
            }
            _ => {
                translate_srt(
                    self.translator.as_ref(),
                    content,
                    &request.source_language,
                    &request.target_language,
                    self.glossary.clone(),
                    request.series_id,
                    request.cancel.clone(),
                )
                .await?
            }
        };

        report(0.9, JobPhase::Write);
        ensure_within_root(target, &self.config.media_root)?;
        atomic_write(target, translated.as_bytes()).await?;

        self.record_history(
            request,
            &backend,
            "",
            0,
            format,
            ArtifactSource::Translated,
            translated.as_bytes(),
        )?;
        self.events.publish(Event::TranslationCompleted {
            file_path: request.video_path.to_string_lossy().to_string(),
            language: request.target_language.clone(),
            backend,
            lines: line_count,
        });
        info!(path = %target.display(), lines = line_count, "subtitle translated");
        Ok(AcquireOutcome::Acquired {
            source: ArtifactSource::Translated,
            path: target.to_string_lossy().to_string(),
            provider: None,
            score: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn record_history(
        &self,
        request: &AcquireRequest,
        provider: &str,
        subtitle_id: &str,
        score: u32,
        format: SubtitleFormat,
        source: ArtifactSource,
        body: &[u8],
    ) -> Result<(), PipelineError> {
        self.history.insert(&DownloadInsert {
            file_path: request.video_path.to_string_lossy().to_string(),
            target_language: request.target_language.clone(),
            provider: provider.to_string(),
            subtitle_id: subtitle_id.to_string(),
            score,
            format,
            source,
            content_hash: content_hash(body),
        })?;
        Ok(())
    }

    fn target_paths(&self, request: &AcquireRequest) -> (PathBuf, PathBuf) {
        let suffix = match request.subtitle_type {
            SubtitleType::Forced => format!("{}.forced", request.target_language),
            _ => request.target_language.clone(),
        };
        let stem = request
            .video_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = request
            .video_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        (
            dir.join(format!("{stem}.{suffix}.ass")),
            dir.join(format!("{stem}.{suffix}.srt")),
        )
    }

    fn find_embedded<'a>(
        &self,
        streams: &'a [MediaStream],
        language: &str,
        styled: bool,
        forced: bool,
    ) -> Option<&'a MediaStream> {
        streams.iter().find(|s| {
            s.kind == StreamKind::Subtitle
                && s.is_text_subtitle()
                && s.language_matches(language)
                && (if styled {
                    matches!(s.codec_name.as_str(), "ass" | "ssa")
                } else {
                    matches!(s.codec_name.as_str(), "subrip" | "srt" | "mov_text")
                })
                && s.disposition.forced == forced
        })
    }

    async fn build_query(&self, request: &AcquireRequest) -> VideoQuery {
        let mut query = request.query.clone().unwrap_or_else(|| {
            let mut query = VideoQuery::new(request.video_path.clone(), Vec::new());
            let (title, season, episode, year) = parse_media_name(&request.video_path);
            query.title = title;
            query.season = season;
            query.episode = episode;
            query.year = year;
            query
        });
        query.languages = vec![
            request.target_language.clone(),
            request.source_language.clone(),
        ];
        if query.file_hash.is_none() {
            let path = request.video_path.clone();
            if let Ok(Ok((hash, size))) =
                tokio::task::spawn_blocking(move || compute_file_hash(&path)).await
            {
                query.file_hash = Some(hash);
                query.file_size = size;
            }
        }
        query
    }
}

/// Forced detection union: provider flag or filename marker.
fn result_is_forced(result: &crate::provider::ProviderResult) -> bool {
    result.forced
        || result
            .filename
            .as_deref()
            .map(|name| name.to_ascii_lowercase().contains("forced"))
            .unwrap_or(false)
}

fn sibling_subtitle_path(video: &Path, language: &str, format: SubtitleFormat) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    video
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
        .join(format!("{stem}.{language}.{}", format.extension()))
}

fn content_hash(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

/// Best-effort series/season/episode/year from the file name.
pub(crate) fn parse_media_name(
    path: &Path,
) -> (Option<String>, Option<u32>, Option<u32>, Option<u32>) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let episode_re = Regex::new(r"(?i)S(\d{1,2})E(\d{1,3})").unwrap();
    let year_re = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();

    let (season, episode, title_end) = match episode_re.captures(&stem) {
        Some(caps) => {
            let full = caps.get(0).unwrap();
            (
                caps[1].parse().ok(),
                caps[2].parse().ok(),
                full.start(),
            )
        }
        None => (None, None, stem.len()),
    };

    let year = year_re
        .captures(&stem)
        .and_then(|caps| caps[1].parse().ok());

    let raw_title = stem[..title_end]
        .replace(['.', '_'], " ")
        .trim()
        .trim_end_matches('-')
        .trim()
        .to_string();
    let title = if raw_title.is_empty() {
        None
    } else {
        Some(raw_title)
    };

    (title, season, episode, year)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_name_episode() {
        let (title, season, episode, _) =
            parse_media_name(Path::new("/m/Show Name S01E02 1080p.mkv"));
        assert_eq!(title.as_deref(), Some("Show Name"));
        assert_eq!(season, Some(1));
        assert_eq!(episode, Some(2));
    }

    #[test]
    fn test_parse_media_name_dotted() {
        let (title, season, episode, _) =
            parse_media_name(Path::new("/m/Show.Name.S10E20.720p.mkv"));
        assert_eq!(title.as_deref(), Some("Show Name"));
        assert_eq!(season, Some(10));
        assert_eq!(episode, Some(20));
    }

    #[test]
    fn test_parse_media_name_movie() {
        let (title, season, episode, year) =
            parse_media_name(Path::new("/m/Some Movie 2021 1080p.mkv"));
        assert!(title.is_some());
        assert_eq!(season, None);
        assert_eq!(episode, None);
        assert_eq!(year, Some(2021));
    }

    #[test]
    fn test_sibling_path_naming() {
        let path = sibling_subtitle_path(
            Path::new("/media/A/S01E01.mkv"),
            "de",
            SubtitleFormat::Ass,
        );
        assert_eq!(path, Path::new("/media/A/S01E01.de.ass"));
    }

    #[test]
    fn test_result_is_forced_union() {
        let mut result = crate::provider::ProviderResult {
            provider: "p".into(),
            id: "1".into(),
            language: "de".into(),
            format: SubtitleFormat::Srt,
            filename: None,
            download_ref: "r".into(),
            release_info: None,
            hearing_impaired: false,
            forced: false,
            machine_translated: false,
            matches: Default::default(),
        };
        assert!(!result_is_forced(&result));
        result.forced = true;
        assert!(result_is_forced(&result));
        result.forced = false;
        result.filename = Some("Show.S01E01.de.FORCED.srt".into());
        assert!(result_is_forced(&result));
    }
}
