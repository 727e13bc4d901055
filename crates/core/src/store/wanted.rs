//! Wanted-item repository.
//!
//! Rows are unique per (file_path, target_language, subtitle_type); status
//! transitions are serialized by the store's write lock.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};

use super::db::Db;
use super::error::StoreError;
use super::jobs::{parse_opt_ts, parse_ts};
use super::types::{MediaKind, SubtitleType, WantedItem, WantedStatus};

/// Fields for an upsert; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct WantedUpsert {
    pub kind: MediaKind,
    pub series_id: Option<i64>,
    pub episode_id: Option<i64>,
    pub file_path: String,
    pub target_language: String,
    pub subtitle_type: SubtitleType,
    pub status: WantedStatus,
}

/// Filter for wanted listings.
#[derive(Debug, Clone, Default)]
pub struct WantedFilter {
    pub status: Option<WantedStatus>,
    pub language: Option<String>,
    pub limit: Option<i64>,
}

impl WantedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: WantedStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub trait WantedStore: Send + Sync {
    /// Insert or refresh the row for the item's uniqueness key.
    ///
    /// An existing `ignored` row is left untouched (absorbing); an existing
    /// `searching` row keeps its status so a scan cannot stomp an in-flight
    /// search.
    fn upsert(&self, item: &WantedUpsert) -> Result<WantedItem, StoreError>;

    fn get(&self, id: i64) -> Result<Option<WantedItem>, StoreError>;

    fn find(
        &self,
        file_path: &str,
        language: &str,
        subtitle_type: SubtitleType,
    ) -> Result<Option<WantedItem>, StoreError>;

    fn list(&self, filter: &WantedFilter) -> Result<Vec<WantedItem>, StoreError>;

    fn set_status(&self, id: i64, status: WantedStatus) -> Result<WantedItem, StoreError>;

    /// Record a finished search attempt: bumps `search_count`, stores the
    /// error, and moves the row to `found` or `failed`.
    fn record_attempt(&self, id: i64, found: bool, error: Option<&str>)
        -> Result<WantedItem, StoreError>;

    /// Decay `failed` rows whose backoff elapsed back to `wanted`.
    /// `base` is the first retry delay; the delay doubles per attempt up to
    /// `2^cap`, and rows past `max_attempts` stay failed.
    fn decay_failed(
        &self,
        base: Duration,
        cap: u32,
        max_attempts: u32,
    ) -> Result<usize, StoreError>;

    fn mark_scanned(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete rows whose backing file is gone.
    fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Items eligible for a batch search: `wanted` or `upgrade_candidate`
    /// whose cooldown elapsed.
    fn due_for_search(&self, base: Duration, cap: u32, limit: i64)
        -> Result<Vec<WantedItem>, StoreError>;
}

pub struct SqliteWantedStore {
    db: Db,
}

const COLUMNS: &str = "id, kind, series_id, episode_id, file_path, target_language, subtitle_type, status, search_count, last_searched_at, last_scanned_at, last_error, created_at, updated_at";

impl SqliteWantedStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn row_to_item(row: &Row) -> rusqlite::Result<WantedItem> {
        let kind: String = row.get(1)?;
        let subtitle_type: String = row.get(6)?;
        let status: String = row.get(7)?;
        Ok(WantedItem {
            id: row.get(0)?,
            kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Episode),
            series_id: row.get(2)?,
            episode_id: row.get(3)?,
            file_path: row.get(4)?,
            target_language: row.get(5)?,
            subtitle_type: SubtitleType::parse(&subtitle_type).unwrap_or(SubtitleType::Normal),
            status: WantedStatus::parse(&status).unwrap_or(WantedStatus::Wanted),
            search_count: row.get(8)?,
            last_searched_at: parse_opt_ts(row.get(9)?),
            last_scanned_at: parse_opt_ts(row.get(10)?),
            last_error: row.get(11)?,
            created_at: parse_ts(row.get(12)?),
            updated_at: parse_ts(row.get(13)?),
        })
    }

    fn get_by_key(
        conn: &rusqlite::Connection,
        file_path: &str,
        language: &str,
        subtitle_type: SubtitleType,
    ) -> rusqlite::Result<Option<WantedItem>> {
        let result = conn.query_row(
            &format!(
                "SELECT {COLUMNS} FROM wanted_items
                 WHERE file_path = ? AND target_language = ? AND subtitle_type = ?"
            ),
            params![file_path, language, subtitle_type.as_str()],
            Self::row_to_item,
        );
        match result {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Backoff delay before a row with `search_count` attempts may retry.
fn retry_delay(base: Duration, cap: u32, search_count: u32) -> Duration {
    let exponent = search_count.min(cap);
    base * 2_i32.saturating_pow(exponent)
}

impl WantedStore for SqliteWantedStore {
    fn upsert(&self, item: &WantedUpsert) -> Result<WantedItem, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            let existing = Self::get_by_key(
                tx,
                &item.file_path,
                &item.target_language,
                item.subtitle_type,
            )?;
            match existing {
                Some(current) => {
                    let keep_status = current.status.is_absorbing()
                        || current.status == WantedStatus::Searching;
                    let status = if keep_status {
                        current.status
                    } else {
                        item.status
                    };
                    tx.execute(
                        "UPDATE wanted_items SET kind = ?, series_id = ?, episode_id = ?, status = ?, updated_at = ? WHERE id = ?",
                        params![
                            item.kind.as_str(),
                            item.series_id,
                            item.episode_id,
                            status.as_str(),
                            now,
                            current.id
                        ],
                    )?;
                    Self::get_by_key(tx, &item.file_path, &item.target_language, item.subtitle_type)?
                        .ok_or(rusqlite::Error::QueryReturnedNoRows)
                }
                None => {
                    tx.execute(
                        "INSERT INTO wanted_items (kind, series_id, episode_id, file_path, target_language, subtitle_type, status, created_at, updated_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        params![
                            item.kind.as_str(),
                            item.series_id,
                            item.episode_id,
                            item.file_path,
                            item.target_language,
                            item.subtitle_type.as_str(),
                            item.status.as_str(),
                            now,
                            now
                        ],
                    )?;
                    Self::get_by_key(tx, &item.file_path, &item.target_language, item.subtitle_type)?
                        .ok_or(rusqlite::Error::QueryReturnedNoRows)
                }
            }
        })
    }

    fn get(&self, id: i64) -> Result<Option<WantedItem>, StoreError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                &format!("SELECT {COLUMNS} FROM wanted_items WHERE id = ?"),
                params![id],
                Self::row_to_item,
            );
            match result {
                Ok(item) => Ok(Some(item)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn find(
        &self,
        file_path: &str,
        language: &str,
        subtitle_type: SubtitleType,
    ) -> Result<Option<WantedItem>, StoreError> {
        self.db
            .with_conn(|conn| Self::get_by_key(conn, file_path, language, subtitle_type))
    }

    fn list(&self, filter: &WantedFilter) -> Result<Vec<WantedItem>, StoreError> {
        let status = filter.status.map(|s| s.as_str().to_string());
        let limit = filter.limit.unwrap_or(500);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM wanted_items
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR target_language = ?2)
                 ORDER BY updated_at DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![status, filter.language, limit], Self::row_to_item)?;
            rows.collect()
        })
    }

    fn set_status(&self, id: i64, status: WantedStatus) -> Result<WantedItem, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db
            .with_tx(|tx| {
                let affected = tx.execute(
                    "UPDATE wanted_items SET status = ?, updated_at = ? WHERE id = ?",
                    params![status.as_str(), now, id],
                )?;
                if affected == 0 {
                    return Err(rusqlite::Error::QueryReturnedNoRows);
                }
                tx.query_row(
                    &format!("SELECT {COLUMNS} FROM wanted_items WHERE id = ?"),
                    params![id],
                    Self::row_to_item,
                )
            })
            .map_err(|e| match e {
                StoreError::Database(msg) if msg.contains("no rows") => {
                    StoreError::NotFound(format!("wanted item {id}"))
                }
                other => other,
            })
    }

    fn record_attempt(
        &self,
        id: i64,
        found: bool,
        error: Option<&str>,
    ) -> Result<WantedItem, StoreError> {
        let now = Utc::now().to_rfc3339();
        let status = if found {
            WantedStatus::Found
        } else {
            WantedStatus::Failed
        };
        self.db
            .with_tx(|tx| {
                let affected = tx.execute(
                    "UPDATE wanted_items SET status = ?, search_count = search_count + 1,
                            last_searched_at = ?, last_error = ?, updated_at = ?
                     WHERE id = ?",
                    params![status.as_str(), now, error, now, id],
                )?;
                if affected == 0 {
                    return Err(rusqlite::Error::QueryReturnedNoRows);
                }
                tx.query_row(
                    &format!("SELECT {COLUMNS} FROM wanted_items WHERE id = ?"),
                    params![id],
                    Self::row_to_item,
                )
            })
            .map_err(|e| match e {
                StoreError::Database(msg) if msg.contains("no rows") => {
                    StoreError::NotFound(format!("wanted item {id}"))
                }
                other => other,
            })
    }

    fn decay_failed(
        &self,
        base: Duration,
        cap: u32,
        max_attempts: u32,
    ) -> Result<usize, StoreError> {
        let now = Utc::now();
        let failed = self.list(&WantedFilter::new().with_status(WantedStatus::Failed))?;
        let mut decayed = 0;
        for item in failed {
            if item.search_count > max_attempts {
                continue;
            }
            let due = item
                .last_searched_at
                .map(|at| at + retry_delay(base, cap, item.search_count) <= now)
                .unwrap_or(true);
            if due {
                self.set_status(item.id, WantedStatus::Wanted)?;
                decayed += 1;
            }
        }
        Ok(decayed)
    }

    fn mark_scanned(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE wanted_items SET last_scanned_at = ? WHERE id = ?",
                params![at.to_rfc3339(), id],
            )?;
            Ok(())
        })
    }

    fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM wanted_items WHERE id = ?", params![id])?;
            Ok(())
        })
    }

    fn due_for_search(
        &self,
        base: Duration,
        cap: u32,
        limit: i64,
    ) -> Result<Vec<WantedItem>, StoreError> {
        let now = Utc::now();
        let mut due = Vec::new();
        for status in [WantedStatus::Wanted, WantedStatus::UpgradeCandidate] {
            for item in self.list(&WantedFilter::new().with_status(status))? {
                let ready = item
                    .last_searched_at
                    .map(|at| at + retry_delay(base, cap, item.search_count) <= now)
                    .unwrap_or(true);
                if ready {
                    due.push(item);
                }
            }
        }
        due.truncate(limit as usize);
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteWantedStore {
        SqliteWantedStore::new(Db::in_memory().unwrap())
    }

    fn upsert_of(path: &str, lang: &str) -> WantedUpsert {
        WantedUpsert {
            kind: MediaKind::Episode,
            series_id: Some(12),
            episode_id: Some(340),
            file_path: path.to_string(),
            target_language: lang.to_string(),
            subtitle_type: SubtitleType::Normal,
            status: WantedStatus::Wanted,
        }
    }

    #[test]
    fn test_upsert_inserts_then_updates_in_place() {
        let store = store();
        let first = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        let second = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        assert_eq!(first.id, second.id);

        let all = store.list(&WantedFilter::new()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_uniqueness_key_includes_type_and_language() {
        let store = store();
        store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        store.upsert(&upsert_of("/m/a.mkv", "fr")).unwrap();
        let mut forced = upsert_of("/m/a.mkv", "de");
        forced.subtitle_type = SubtitleType::Forced;
        store.upsert(&forced).unwrap();

        assert_eq!(store.list(&WantedFilter::new()).unwrap().len(), 3);
    }

    #[test]
    fn test_ignored_is_absorbing_across_upserts() {
        let store = store();
        let item = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        store.set_status(item.id, WantedStatus::Ignored).unwrap();

        let after = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        assert_eq!(after.status, WantedStatus::Ignored);
    }

    #[test]
    fn test_searching_survives_rescan_upsert() {
        let store = store();
        let item = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        store.set_status(item.id, WantedStatus::Searching).unwrap();

        let after = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        assert_eq!(after.status, WantedStatus::Searching);
    }

    #[test]
    fn test_record_attempt_success() {
        let store = store();
        let item = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        let after = store.record_attempt(item.id, true, None).unwrap();
        assert_eq!(after.status, WantedStatus::Found);
        assert_eq!(after.search_count, 1);
        assert!(after.last_searched_at.is_some());
    }

    #[test]
    fn test_record_attempt_failure_keeps_error() {
        let store = store();
        let item = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        let after = store
            .record_attempt(item.id, false, Some("no source available"))
            .unwrap();
        assert_eq!(after.status, WantedStatus::Failed);
        assert_eq!(after.last_error.as_deref(), Some("no source available"));
    }

    #[test]
    fn test_decay_failed_respects_max_attempts() {
        let store = store();
        let item = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        for _ in 0..6 {
            store.record_attempt(item.id, false, Some("x")).unwrap();
            // Re-arm as failed for the next attempt.
        }
        // search_count is now 6 > max_attempts 5: stays failed.
        let decayed = store.decay_failed(Duration::seconds(0), 5, 5).unwrap();
        assert_eq!(decayed, 0);
        assert_eq!(
            store.get(item.id).unwrap().unwrap().status,
            WantedStatus::Failed
        );
    }

    #[test]
    fn test_decay_failed_returns_to_wanted() {
        let store = store();
        let item = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        store.record_attempt(item.id, false, Some("x")).unwrap();

        // Zero base delay: immediately due.
        let decayed = store.decay_failed(Duration::seconds(0), 5, 5).unwrap();
        assert_eq!(decayed, 1);
        assert_eq!(
            store.get(item.id).unwrap().unwrap().status,
            WantedStatus::Wanted
        );
    }

    #[test]
    fn test_due_for_search_skips_cooling_down() {
        let store = store();
        let ready = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        let cooling = store.upsert(&upsert_of("/m/b.mkv", "de")).unwrap();
        store.record_attempt(cooling.id, false, None).unwrap();
        store.set_status(cooling.id, WantedStatus::Wanted).unwrap();

        // One-hour base delay: the just-searched row is not due.
        let due = store.due_for_search(Duration::hours(1), 5, 10).unwrap();
        let ids: Vec<i64> = due.iter().map(|i| i.id).collect();
        assert!(ids.contains(&ready.id));
        assert!(!ids.contains(&cooling.id));
    }

    #[test]
    fn test_retry_delay_caps_exponent() {
        let base = Duration::minutes(1);
        assert_eq!(retry_delay(base, 5, 0), Duration::minutes(1));
        assert_eq!(retry_delay(base, 5, 3), Duration::minutes(8));
        assert_eq!(retry_delay(base, 5, 50), Duration::minutes(32));
    }

    #[test]
    fn test_delete() {
        let store = store();
        let item = store.upsert(&upsert_of("/m/a.mkv", "de")).unwrap();
        store.delete(item.id).unwrap();
        assert!(store.get(item.id).unwrap().is_none());
    }
}
