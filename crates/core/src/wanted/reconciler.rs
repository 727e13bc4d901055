//! Library-vs-disk reconciliation.
//!
//! Walks the expected-media set, probes each file (cached) and upserts the
//! desired-vs-actual gap as wanted rows. Most runs are incremental; every
//! Nth tick forces a full sweep.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};
use crate::library::{ExpectedItem, LibrarySource};
use crate::probe::{MediaStream, ProbeService};
use crate::store::{
    ProfileStore, SubtitleType, WantedStatus, WantedStore, WantedUpsert,
};
use crate::subtitle::SubtitleFormat;

#[derive(Debug, Error)]
pub enum WantedError {
    #[error("library source failed: {0}")]
    Library(String),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Every Nth tick runs a full sweep.
    pub full_sweep_every: u32,
    /// Concurrent probes during a sweep.
    pub probe_concurrency: usize,
    /// Languages used when no profile matches.
    pub default_languages: Vec<String>,
    /// Also track forced subtitles as a separate dimension.
    pub track_forced: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            full_sweep_every: 6,
            probe_concurrency: 4,
            default_languages: vec!["en".to_string()],
            track_forced: false,
        }
    }
}

/// Counters from one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: usize,
    pub added: usize,
    pub satisfied: usize,
}

pub struct Reconciler {
    config: ReconcilerConfig,
    library: Arc<dyn LibrarySource>,
    probe: Arc<ProbeService>,
    wanted: Arc<dyn WantedStore>,
    profiles: Arc<dyn ProfileStore>,
    events: Arc<EventBus>,
    ticks: AtomicU32,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        library: Arc<dyn LibrarySource>,
        probe: Arc<ProbeService>,
        wanted: Arc<dyn WantedStore>,
        profiles: Arc<dyn ProfileStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            library,
            probe,
            wanted,
            profiles,
            events,
            ticks: AtomicU32::new(0),
        }
    }

    /// Scheduler entry point: incremental most ticks, full every Nth.
    pub async fn tick(&self) -> Result<ScanSummary, WantedError> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        let full = self.config.full_sweep_every > 0
            && tick % self.config.full_sweep_every == 0;
        self.reconcile(full).await
    }

    /// Run one reconcile pass.
    pub async fn reconcile(&self, full: bool) -> Result<ScanSummary, WantedError> {
        let items = self
            .library
            .expected_items()
            .await
            .map_err(|e| WantedError::Library(e.to_string()))?;
        info!(items = items.len(), full, "reconcile started");

        let mut summary = ScanSummary::default();
        let results: Vec<Result<ScanSummary, WantedError>> =
            futures::stream::iter(items.into_iter().map(|item| async move {
                self.reconcile_item(&item, full).await
            }))
            .buffer_unordered(self.config.probe_concurrency.max(1))
            .collect()
            .await;
        for result in results {
            match result {
                Ok(item_summary) => {
                    summary.scanned += item_summary.scanned;
                    summary.added += item_summary.added;
                    summary.satisfied += item_summary.satisfied;
                }
                Err(e) => warn!(error = %e, "item reconcile failed"),
            }
        }

        self.events.publish(Event::WantedScanned {
            scanned: summary.scanned,
            added: summary.added,
            satisfied: summary.satisfied,
        });
        crate::metrics::RECONCILE_RUNS
            .with_label_values(&[if full { "full" } else { "incremental" }])
            .inc();
        self.refresh_status_gauges();
        info!(?summary, "reconcile finished");
        Ok(summary)
    }

    fn refresh_status_gauges(&self) {
        for status in [
            WantedStatus::Wanted,
            WantedStatus::UpgradeCandidate,
            WantedStatus::Searching,
            WantedStatus::Found,
            WantedStatus::Failed,
            WantedStatus::Ignored,
        ] {
            if let Ok(rows) = self
                .wanted
                .list(&crate::store::WantedFilter::new().with_status(status))
            {
                crate::metrics::WANTED_ITEMS
                    .with_label_values(&[status.as_str()])
                    .set(rows.len() as i64);
            }
        }
    }

    async fn reconcile_item(
        &self,
        item: &ExpectedItem,
        full: bool,
    ) -> Result<ScanSummary, WantedError> {
        let mut summary = ScanSummary::default();
        if !item.file_path.exists() {
            // Backing file vanished: clear any stale rows.
            self.drop_rows_for(&item.file_path).await?;
            return Ok(summary);
        }

        let languages = {
            let langs = self.profiles.effective_languages(item.series_id)?;
            if langs.is_empty() {
                self.config.default_languages.clone()
            } else {
                langs
            }
        };
        let mut types = vec![SubtitleType::Normal];
        if self.config.track_forced {
            types.push(SubtitleType::Forced);
        }

        let mut streams: Option<Vec<MediaStream>> = None;
        let now = Utc::now();
        for language in &languages {
            for subtitle_type in &types {
                let existing = self.wanted.find(
                    &item.file_path.to_string_lossy(),
                    language,
                    *subtitle_type,
                )?;

                if !full && !self.needs_rescan(&item.file_path, existing.as_ref()) {
                    continue;
                }
                summary.scanned += 1;

                // Probe lazily: satisfied-by-sibling needs no probe at all.
                let gap = match self.on_disk_state(&item.file_path, language, *subtitle_type) {
                    DiskState::Styled => Gap::Satisfied,
                    DiskState::PlainOnly => Gap::UpgradeCandidate,
                    DiskState::Nothing => {
                        if streams.is_none() {
                            streams = Some(self.probe.probe(&item.file_path).await);
                        }
                        let probed = streams.as_deref().unwrap_or_default();
                        self.embedded_state(probed, language, *subtitle_type)
                    }
                };

                match gap {
                    Gap::Satisfied => {
                        if let Some(row) = &existing {
                            if !matches!(
                                row.status,
                                WantedStatus::Found | WantedStatus::Ignored
                            ) {
                                self.wanted.set_status(row.id, WantedStatus::Found)?;
                            }
                            self.wanted.mark_scanned(row.id, now)?;
                        }
                        summary.satisfied += 1;
                    }
                    Gap::UpgradeCandidate | Gap::Wanted => {
                        let status = if gap == Gap::UpgradeCandidate {
                            WantedStatus::UpgradeCandidate
                        } else {
                            WantedStatus::Wanted
                        };
                        let was_new = existing.is_none()
                            || existing
                                .as_ref()
                                .map(|row| row.status != status)
                                .unwrap_or(true);
                        let row = self.wanted.upsert(&WantedUpsert {
                            kind: item.kind,
                            series_id: item.series_id,
                            episode_id: item.episode_id,
                            file_path: item.file_path.to_string_lossy().to_string(),
                            target_language: language.clone(),
                            subtitle_type: *subtitle_type,
                            status,
                        })?;
                        self.wanted.mark_scanned(row.id, now)?;
                        if was_new {
                            summary.added += 1;
                        }
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Incremental filter: re-evaluate when the file is newer than the last
    /// scan or the row is still open.
    fn needs_rescan(
        &self,
        path: &Path,
        existing: Option<&crate::store::WantedItem>,
    ) -> bool {
        let Some(row) = existing else {
            return true;
        };
        if matches!(
            row.status,
            WantedStatus::Wanted | WantedStatus::UpgradeCandidate
        ) {
            return true;
        }
        let Some(last_scanned) = row.last_scanned_at else {
            return true;
        };
        file_mtime(path)
            .map(|mtime| mtime > last_scanned)
            .unwrap_or(true)
    }

    fn on_disk_state(&self, video: &Path, language: &str, subtitle_type: SubtitleType) -> DiskState {
        let suffix = match subtitle_type {
            SubtitleType::Forced => format!("{language}.forced"),
            _ => language.to_string(),
        };
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = video.parent().unwrap_or(Path::new(""));
        let styled = [SubtitleFormat::Ass, SubtitleFormat::Ssa]
            .iter()
            .any(|f| dir.join(format!("{stem}.{suffix}.{}", f.extension())).exists());
        if styled {
            return DiskState::Styled;
        }
        if dir.join(format!("{stem}.{suffix}.srt")).exists() {
            return DiskState::PlainOnly;
        }
        DiskState::Nothing
    }

    fn embedded_state(
        &self,
        streams: &[MediaStream],
        language: &str,
        subtitle_type: SubtitleType,
    ) -> Gap {
        let forced = subtitle_type == SubtitleType::Forced;
        let mut has_plain = false;
        for stream in streams {
            if !stream.is_text_subtitle()
                || !stream.language_matches(language)
                || stream.disposition.forced != forced
            {
                continue;
            }
            if matches!(stream.codec_name.as_str(), "ass" | "ssa") {
                return Gap::Satisfied;
            }
            has_plain = true;
        }
        if has_plain {
            Gap::UpgradeCandidate
        } else {
            Gap::Wanted
        }
    }

    async fn drop_rows_for(&self, path: &Path) -> Result<(), WantedError> {
        for status in [
            WantedStatus::Wanted,
            WantedStatus::UpgradeCandidate,
            WantedStatus::Searching,
            WantedStatus::Found,
            WantedStatus::Failed,
        ] {
            let rows = self
                .wanted
                .list(&crate::store::WantedFilter::new().with_status(status))?;
            for row in rows {
                if Path::new(&row.file_path) == path {
                    debug!(path = %row.file_path, "dropping wanted row for missing file");
                    self.wanted.delete(row.id)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiskState {
    Styled,
    PlainOnly,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gap {
    Satisfied,
    UpgradeCandidate,
    Wanted,
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = meta.modified().ok()?;
    let secs = mtime.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::library::LibraryError;
    use crate::probe::{Disposition, MediaProber, ProbeCacheRepo, StreamKind};
    use crate::store::{
        Db, MediaKind, ProfileStore as _, SqliteProfileStore, SqliteWantedStore, WantedFilter,
        WantedStore as _,
    };

    struct StaticLibrary {
        items: Vec<ExpectedItem>,
    }

    #[async_trait]
    impl LibrarySource for StaticLibrary {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn expected_items(&self) -> Result<Vec<ExpectedItem>, LibraryError> {
            Ok(self.items.clone())
        }
    }

    struct StaticProber {
        streams: Vec<MediaStream>,
    }

    #[async_trait]
    impl MediaProber for StaticProber {
        fn engine(&self) -> &'static str {
            "static"
        }

        async fn probe(
            &self,
            _path: &Path,
        ) -> Result<Vec<MediaStream>, crate::probe::ProbeError> {
            Ok(self.streams.clone())
        }
    }

    struct NoopCache;

    impl ProbeCacheRepo for NoopCache {
        fn get(&self, _: &Path, _: i64) -> Option<Vec<MediaStream>> {
            None
        }
        fn put(&self, _: &Path, _: i64, _: &[MediaStream]) {}
        fn invalidate(&self, _: &Path) {}
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        video: std::path::PathBuf,
        reconciler: Reconciler,
        wanted: Arc<SqliteWantedStore>,
    }

    fn fixture(streams: Vec<MediaStream>, languages: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("Show S01E01.mkv");
        std::fs::write(&video, b"video").unwrap();

        let db = Db::in_memory().unwrap();
        let wanted = Arc::new(SqliteWantedStore::new(db.clone()));
        let profiles = Arc::new(SqliteProfileStore::new(db));
        profiles
            .create(
                "default",
                &languages.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                true,
            )
            .unwrap();

        let library = Arc::new(StaticLibrary {
            items: vec![ExpectedItem {
                kind: MediaKind::Episode,
                series_id: None,
                episode_id: None,
                title: Some("Show".into()),
                year: None,
                season: Some(1),
                episode: Some(1),
                file_path: video.clone(),
                ids: Default::default(),
                tags: Vec::new(),
            }],
        });
        let probe = Arc::new(ProbeService::new(
            Arc::new(StaticProber { streams }),
            Arc::new(NoopCache),
        ));
        let reconciler = Reconciler::new(
            ReconcilerConfig::default(),
            library,
            probe,
            wanted.clone(),
            profiles,
            Arc::new(EventBus::default()),
        );
        Fixture {
            _dir: dir,
            video,
            reconciler,
            wanted,
        }
    }

    #[tokio::test]
    async fn test_missing_subtitle_creates_wanted_row() {
        let fx = fixture(Vec::new(), &["de"]);
        let summary = fx.reconciler.reconcile(true).await.unwrap();
        assert_eq!(summary.added, 1);

        let rows = fx.wanted.list(&WantedFilter::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, WantedStatus::Wanted);
        assert_eq!(rows[0].target_language, "de");
    }

    #[tokio::test]
    async fn test_sibling_ass_is_satisfied() {
        let fx = fixture(Vec::new(), &["de"]);
        let ass = fx.video.with_file_name("Show S01E01.de.ass");
        std::fs::write(&ass, b"[Script Info]\n").unwrap();

        let summary = fx.reconciler.reconcile(true).await.unwrap();
        assert_eq!(summary.satisfied, 1);
        assert!(fx.wanted.list(&WantedFilter::new()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sibling_srt_is_upgrade_candidate() {
        let fx = fixture(Vec::new(), &["de"]);
        let srt = fx.video.with_file_name("Show S01E01.de.srt");
        std::fs::write(&srt, b"1\n").unwrap();

        fx.reconciler.reconcile(true).await.unwrap();
        let rows = fx.wanted.list(&WantedFilter::new()).unwrap();
        assert_eq!(rows[0].status, WantedStatus::UpgradeCandidate);
    }

    #[tokio::test]
    async fn test_embedded_ass_satisfies() {
        let fx = fixture(
            vec![MediaStream {
                index: 2,
                kind: StreamKind::Subtitle,
                codec_name: "ass".into(),
                language: Some("de".into()),
                title: None,
                disposition: Disposition::default(),
            }],
            &["de"],
        );
        let summary = fx.reconciler.reconcile(true).await.unwrap();
        assert_eq!(summary.satisfied, 1);
        assert!(fx.wanted.list(&WantedFilter::new()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_twice_is_idempotent() {
        let fx = fixture(Vec::new(), &["de"]);
        fx.reconciler.reconcile(true).await.unwrap();
        let first: Vec<_> = fx.wanted.list(&WantedFilter::new()).unwrap();

        let summary = fx.reconciler.reconcile(true).await.unwrap();
        let second: Vec<_> = fx.wanted.list(&WantedFilter::new()).unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].status, second[0].status);
        assert_eq!(summary.added, 0);
    }

    #[tokio::test]
    async fn test_multiple_languages_get_separate_rows() {
        let fx = fixture(Vec::new(), &["de", "fr"]);
        fx.reconciler.reconcile(true).await.unwrap();
        let rows = fx.wanted.list(&WantedFilter::new()).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_drops_rows() {
        let fx = fixture(Vec::new(), &["de"]);
        fx.reconciler.reconcile(true).await.unwrap();
        assert_eq!(fx.wanted.list(&WantedFilter::new()).unwrap().len(), 1);

        std::fs::remove_file(&fx.video).unwrap();
        fx.reconciler.reconcile(true).await.unwrap();
        assert!(fx.wanted.list(&WantedFilter::new()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nth_tick_forces_full_sweep() {
        let fx = fixture(Vec::new(), &["de"]);
        // Tick 0 is a full sweep by construction.
        fx.reconciler.tick().await.unwrap();
        assert_eq!(fx.wanted.list(&WantedFilter::new()).unwrap().len(), 1);
    }
}
