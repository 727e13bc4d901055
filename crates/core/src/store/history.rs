//! Download-history repository.

use chrono::Utc;
use rusqlite::{params, Row};

use super::db::Db;
use super::error::StoreError;
use super::jobs::parse_ts;
use super::types::{ArtifactSource, DownloadRecord};
use crate::subtitle::SubtitleFormat;

/// Fields for a new history row.
#[derive(Debug, Clone)]
pub struct DownloadInsert {
    pub file_path: String,
    pub target_language: String,
    pub provider: String,
    pub subtitle_id: String,
    pub score: u32,
    pub format: SubtitleFormat,
    pub source: ArtifactSource,
    pub content_hash: String,
}

pub trait HistoryStore: Send + Sync {
    fn insert(&self, record: &DownloadInsert) -> Result<DownloadRecord, StoreError>;

    /// The most recent record for (path, language), used to seed upgrade
    /// decisions.
    fn latest(&self, file_path: &str, language: &str)
        -> Result<Option<DownloadRecord>, StoreError>;

    /// Whether this exact artifact was already downloaded for the target.
    fn contains_hash(
        &self,
        file_path: &str,
        language: &str,
        content_hash: &str,
    ) -> Result<bool, StoreError>;

    fn list(&self, limit: i64) -> Result<Vec<DownloadRecord>, StoreError>;
}

pub struct SqliteHistoryStore {
    db: Db,
}

const COLUMNS: &str = "id, file_path, target_language, provider, subtitle_id, score, format, source, content_hash, downloaded_at";

impl SqliteHistoryStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<DownloadRecord> {
        let format: String = row.get(6)?;
        let source: String = row.get(7)?;
        Ok(DownloadRecord {
            id: row.get(0)?,
            file_path: row.get(1)?,
            target_language: row.get(2)?,
            provider: row.get(3)?,
            subtitle_id: row.get(4)?,
            score: row.get(5)?,
            format: SubtitleFormat::from_extension(&format),
            source: ArtifactSource::parse(&source).unwrap_or(ArtifactSource::Provider),
            content_hash: row.get(8)?,
            downloaded_at: parse_ts(row.get(9)?),
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn insert(&self, record: &DownloadInsert) -> Result<DownloadRecord, StoreError> {
        let now = Utc::now();
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO download_history (file_path, target_language, provider, subtitle_id, score, format, source, content_hash, downloaded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.file_path,
                    record.target_language,
                    record.provider,
                    record.subtitle_id,
                    record.score,
                    record.format.extension(),
                    record.source.as_str(),
                    record.content_hash,
                    now.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(DownloadRecord {
            id,
            file_path: record.file_path.clone(),
            target_language: record.target_language.clone(),
            provider: record.provider.clone(),
            subtitle_id: record.subtitle_id.clone(),
            score: record.score,
            format: record.format,
            source: record.source,
            content_hash: record.content_hash.clone(),
            downloaded_at: now,
        })
    }

    fn latest(
        &self,
        file_path: &str,
        language: &str,
    ) -> Result<Option<DownloadRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM download_history
                     WHERE file_path = ? AND target_language = ?
                     ORDER BY downloaded_at DESC, id DESC LIMIT 1"
                ),
                params![file_path, language],
                Self::row_to_record,
            );
            match result {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn contains_hash(
        &self,
        file_path: &str,
        language: &str,
        content_hash: &str,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM download_history
                 WHERE file_path = ? AND target_language = ? AND content_hash = ?",
                params![file_path, language, content_hash],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    fn list(&self, limit: i64) -> Result<Vec<DownloadRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM download_history ORDER BY downloaded_at DESC, id DESC LIMIT ?"
            ))?;
            let rows = stmt.query_map(params![limit], Self::row_to_record)?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteHistoryStore {
        SqliteHistoryStore::new(Db::in_memory().unwrap())
    }

    fn insert_of(path: &str, score: u32) -> DownloadInsert {
        DownloadInsert {
            file_path: path.to_string(),
            target_language: "de".to_string(),
            provider: "opensubtitles".to_string(),
            subtitle_id: "12345".to_string(),
            score,
            format: SubtitleFormat::Ass,
            source: ArtifactSource::Provider,
            content_hash: format!("hash-{score}"),
        }
    }

    #[test]
    fn test_insert_and_latest() {
        let store = store();
        store.insert(&insert_of("/m/a.mkv", 200)).unwrap();
        store.insert(&insert_of("/m/a.mkv", 350)).unwrap();

        let latest = store.latest("/m/a.mkv", "de").unwrap().unwrap();
        assert_eq!(latest.score, 350);
        assert_eq!(latest.format, SubtitleFormat::Ass);
    }

    #[test]
    fn test_latest_none_for_unknown_target() {
        assert!(store().latest("/m/x.mkv", "de").unwrap().is_none());
    }

    #[test]
    fn test_contains_hash() {
        let store = store();
        store.insert(&insert_of("/m/a.mkv", 200)).unwrap();
        assert!(store.contains_hash("/m/a.mkv", "de", "hash-200").unwrap());
        assert!(!store.contains_hash("/m/a.mkv", "de", "other").unwrap());
        assert!(!store.contains_hash("/m/b.mkv", "de", "hash-200").unwrap());
    }

    #[test]
    fn test_list_newest_first() {
        let store = store();
        store.insert(&insert_of("/m/a.mkv", 1)).unwrap();
        store.insert(&insert_of("/m/b.mkv", 2)).unwrap();
        let records = store.list(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].file_path, "/m/b.mkv");
    }

    #[test]
    fn test_source_roundtrip() {
        let store = store();
        let mut insert = insert_of("/m/a.mkv", 0);
        insert.source = ArtifactSource::Whisper;
        insert.format = SubtitleFormat::Srt;
        store.insert(&insert).unwrap();

        let latest = store.latest("/m/a.mkv", "de").unwrap().unwrap();
        assert_eq!(latest.source, ArtifactSource::Whisper);
        assert_eq!(latest.format, SubtitleFormat::Srt);
    }
}
