//! Shared database handle and schema.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use super::error::StoreError;

/// Handle to the single writer connection.
///
/// Cloning is cheap; every repository holds a clone and serializes access
/// through the inner lock. The interfaces built on top take `&self`, so a
/// pooled implementation can replace this without touching callers.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the database file and initialize the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure with the locked connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().unwrap();
        f(&conn).map_err(StoreError::from)
    }

    /// Run a closure inside a transaction; rolls back on error.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(StoreError::from)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => Err(StoreError::from(e)),
        }
    }

    /// Truncate the WAL. Called after batch operations.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
    }

    /// Quick integrity check; true means the database reports `ok`.
    pub fn integrity_ok(&self) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let result: String =
                conn.query_row("PRAGMA quick_check;", [], |row| row.get(0))?;
            Ok(result == "ok")
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                state TEXT NOT NULL,
                file_path TEXT NOT NULL,
                target_language TEXT NOT NULL,
                payload TEXT,
                progress REAL NOT NULL DEFAULT 0,
                error TEXT,
                fingerprint TEXT,
                lease_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

            CREATE TABLE IF NOT EXISTS wanted_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                series_id INTEGER,
                episode_id INTEGER,
                file_path TEXT NOT NULL,
                target_language TEXT NOT NULL,
                subtitle_type TEXT NOT NULL,
                status TEXT NOT NULL,
                search_count INTEGER NOT NULL DEFAULT 0,
                last_searched_at TEXT,
                last_scanned_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(file_path, target_language, subtitle_type)
            );
            CREATE INDEX IF NOT EXISTS idx_wanted_status ON wanted_items(status);

            CREATE TABLE IF NOT EXISTS download_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                target_language TEXT NOT NULL,
                provider TEXT NOT NULL,
                subtitle_id TEXT NOT NULL,
                score INTEGER NOT NULL,
                format TEXT NOT NULL,
                source TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                downloaded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_path_lang
                ON download_history(file_path, target_language);

            CREATE TABLE IF NOT EXISTS config_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS provider_health (
                provider TEXT PRIMARY KEY,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                avg_latency_ms REAL NOT NULL DEFAULT 0,
                breaker_state TEXT NOT NULL DEFAULT 'closed',
                breaker_opened_at TEXT,
                auto_disabled_until TEXT
            );

            CREATE TABLE IF NOT EXISTS backend_health (
                backend TEXT PRIMARY KEY,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                avg_latency_ms REAL NOT NULL DEFAULT 0,
                auto_disabled_until TEXT
            );

            CREATE TABLE IF NOT EXISTS probe_cache (
                file_path TEXT PRIMARY KEY,
                mtime INTEGER NOT NULL,
                streams_json TEXT NOT NULL,
                probed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS language_profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                languages TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS series_profile_assignments (
                series_id INTEGER PRIMARY KEY,
                profile_id INTEGER NOT NULL REFERENCES language_profiles(id)
            );
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(&dir.path().join("sublarr.db")).unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert!(count >= 9);
    }

    #[test]
    fn test_in_memory_schema() {
        let db = Db::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO config_entries (key, value, updated_at) VALUES ('a', 'b', 'now')",
                [],
            )
        })
        .unwrap();
    }

    #[test]
    fn test_tx_rolls_back_on_error() {
        let db = Db::in_memory().unwrap();
        let result: Result<(), StoreError> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO config_entries (key, value, updated_at) VALUES ('a', 'b', 'now')",
                [],
            )?;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM config_entries", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_integrity_ok() {
        let db = Db::in_memory().unwrap();
        assert!(db.integrity_ok().unwrap());
    }

    #[test]
    fn test_wanted_uniqueness_enforced() {
        let db = Db::in_memory().unwrap();
        let insert = |db: &Db| {
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO wanted_items (kind, file_path, target_language, subtitle_type, status, created_at, updated_at)
                     VALUES ('episode', '/m/a.mkv', 'de', 'normal', 'wanted', 'now', 'now')",
                    [],
                )
            })
        };
        insert(&db).unwrap();
        let err = insert(&db).unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }
}
