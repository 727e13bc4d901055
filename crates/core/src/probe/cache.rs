//! Read-through probe cache with request coalescing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use super::types::{MediaProber, MediaStream};

/// Persistence for probe results. Implemented by the store; the cache only
/// trusts an entry whose recorded mtime equals the file's current mtime.
pub trait ProbeCacheRepo: Send + Sync {
    fn get(&self, path: &Path, mtime: i64) -> Option<Vec<MediaStream>>;
    fn put(&self, path: &Path, mtime: i64, streams: &[MediaStream]);
    fn invalidate(&self, path: &Path);
}

type ProbeKey = (PathBuf, i64);
type InflightCell = Arc<OnceCell<(Vec<MediaStream>, bool)>>;

/// Read-through cache over a probe engine.
///
/// Concurrent misses for the same (path, mtime) coalesce onto one running
/// probe. Probe failures are returned as an empty stream list and are never
/// cached.
pub struct ProbeService {
    prober: Arc<dyn MediaProber>,
    cache: Arc<dyn ProbeCacheRepo>,
    inflight: Mutex<HashMap<ProbeKey, InflightCell>>,
}

impl ProbeService {
    pub fn new(prober: Arc<dyn MediaProber>, cache: Arc<dyn ProbeCacheRepo>) -> Self {
        Self {
            prober,
            cache,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// The active engine name.
    pub fn engine(&self) -> &'static str {
        self.prober.engine()
    }

    /// Probe a file, serving from cache on an mtime hit.
    ///
    /// Never fails: a missing file or a broken probe yields an empty list so
    /// the pipeline can treat it as "nothing embedded".
    pub async fn probe(&self, path: &Path) -> Vec<MediaStream> {
        let mtime = match file_mtime(path).await {
            Some(mtime) => mtime,
            None => {
                warn!(path = %path.display(), "cannot stat file for probe");
                return Vec::new();
            }
        };

        if let Some(streams) = self.cache.get(path, mtime) {
            debug!(path = %path.display(), "probe cache hit");
            return streams;
        }

        let key = (path.to_path_buf(), mtime);
        let cell = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.clone()).or_default())
        };

        let (streams, ok) = cell
            .get_or_init(|| async {
                match self.prober.probe(path).await {
                    Ok(streams) => (streams, true),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "probe failed");
                        (Vec::new(), false)
                    }
                }
            })
            .await
            .clone();

        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&key);
        }

        if ok {
            // A write between stat and probe completion invalidates the
            // result for caching purposes.
            match file_mtime(path).await {
                Some(current) if current == mtime => {
                    self.cache.put(path, mtime, &streams);
                }
                _ => {
                    self.cache.invalidate(path);
                    debug!(path = %path.display(), "mtime changed mid-probe, not caching");
                }
            }
        }

        streams
    }
}

async fn file_mtime(path: &Path) -> Option<i64> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let mtime = meta.modified().ok()?;
    Some(
        mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0),
    )
}
