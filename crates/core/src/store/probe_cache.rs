//! Persisted probe cache.

use std::path::Path;

use chrono::Utc;
use rusqlite::params;
use tracing::warn;

use super::db::Db;
use crate::probe::{MediaStream, ProbeCacheRepo};

/// SQLite-backed implementation of the probe cache.
///
/// Errors are swallowed with a log line: a broken cache only costs a
/// re-probe, never a pipeline failure.
pub struct SqliteProbeCache {
    db: Db,
}

impl SqliteProbeCache {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Drop every cached entry (config/engine switches call this).
    pub fn clear(&self) {
        let result = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM probe_cache", [])?;
            Ok(())
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to clear probe cache");
        }
    }
}

impl ProbeCacheRepo for SqliteProbeCache {
    fn get(&self, path: &Path, mtime: i64) -> Option<Vec<MediaStream>> {
        let path_str = path.to_string_lossy().to_string();
        let result = self.db.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT mtime, streams_json FROM probe_cache WHERE file_path = ?",
                params![path_str],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                },
            );
            match row {
                Ok(pair) => Ok(Some(pair)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        });

        match result {
            Ok(Some((cached_mtime, json))) if cached_mtime == mtime => {
                serde_json::from_str(&json).ok()
            }
            Ok(Some(_)) => {
                // Stale mtime: discard the entry.
                self.invalidate(path);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "probe cache read failed");
                None
            }
        }
    }

    fn put(&self, path: &Path, mtime: i64, streams: &[MediaStream]) {
        let path_str = path.to_string_lossy().to_string();
        let json = match serde_json::to_string(streams) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to encode probe result");
                return;
            }
        };
        let result = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO probe_cache (file_path, mtime, streams_json, probed_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(file_path) DO UPDATE SET mtime = excluded.mtime,
                     streams_json = excluded.streams_json, probed_at = excluded.probed_at",
                params![path_str, mtime, json, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        });
        if let Err(e) = result {
            warn!(error = %e, "probe cache write failed");
        }
    }

    fn invalidate(&self, path: &Path) {
        let path_str = path.to_string_lossy().to_string();
        let result = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM probe_cache WHERE file_path = ?", params![path_str])?;
            Ok(())
        });
        if let Err(e) = result {
            warn!(error = %e, "probe cache invalidate failed");
        }
    }
}
