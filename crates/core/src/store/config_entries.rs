//! Runtime config-override repository.
//!
//! The third layer of the config cascade. Keys are opaque dotted paths
//! (`providers.opensubtitles.api_key`); values are stored as strings.

use chrono::Utc;
use rusqlite::params;

use super::db::Db;
use super::error::StoreError;

pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn all(&self) -> Result<Vec<(String, String)>, StoreError>;
}

pub struct SqliteConfigStore {
    db: Db,
}

impl SqliteConfigStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl ConfigStore for SqliteConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT value FROM config_entries WHERE key = ?",
                params![key],
                |row| row.get(0),
            );
            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO config_entries (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM config_entries WHERE key = ?", params![key])?;
            Ok(())
        })
    }

    fn all(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value FROM config_entries ORDER BY key")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteConfigStore {
        SqliteConfigStore::new(Db::in_memory().unwrap())
    }

    #[test]
    fn test_set_get() {
        let store = store();
        assert!(store.get("a.b").unwrap().is_none());
        store.set("a.b", "1").unwrap();
        assert_eq!(store.get("a.b").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_set_overwrites() {
        let store = store();
        store.set("k", "old").unwrap();
        store.set("k", "new").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("new"));
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_delete() {
        let store = store();
        store.set("k", "v").unwrap();
        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_all_sorted() {
        let store = store();
        store.set("b", "2").unwrap();
        store.set("a", "1").unwrap();
        let all = store.all().unwrap();
        assert_eq!(all[0].0, "a");
        assert_eq!(all[1].0, "b");
    }
}
