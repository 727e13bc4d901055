//! Language profiles and series assignments.

use rusqlite::{params, Row};

use super::db::Db;
use super::error::StoreError;
use super::types::LanguageProfile;

pub trait ProfileStore: Send + Sync {
    fn create(&self, name: &str, languages: &[String], is_default: bool)
        -> Result<LanguageProfile, StoreError>;
    fn list(&self) -> Result<Vec<LanguageProfile>, StoreError>;
    fn delete(&self, id: i64) -> Result<(), StoreError>;
    fn assign_series(&self, series_id: i64, profile_id: i64) -> Result<(), StoreError>;
    fn unassign_series(&self, series_id: i64) -> Result<(), StoreError>;

    /// The languages effective for a series: its assigned profile, else the
    /// default profile, else empty.
    fn effective_languages(&self, series_id: Option<i64>) -> Result<Vec<String>, StoreError>;
}

pub struct SqliteProfileStore {
    db: Db,
}

impl SqliteProfileStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn row_to_profile(row: &Row) -> rusqlite::Result<LanguageProfile> {
        let languages: String = row.get(2)?;
        Ok(LanguageProfile {
            id: row.get(0)?,
            name: row.get(1)?,
            languages: serde_json::from_str(&languages).unwrap_or_default(),
            is_default: row.get::<_, i64>(3)? != 0,
        })
    }
}

impl ProfileStore for SqliteProfileStore {
    fn create(
        &self,
        name: &str,
        languages: &[String],
        is_default: bool,
    ) -> Result<LanguageProfile, StoreError> {
        let languages_json =
            serde_json::to_string(languages).map_err(|e| StoreError::Database(e.to_string()))?;
        self.db.with_tx(|tx| {
            if is_default {
                tx.execute("UPDATE language_profiles SET is_default = 0", [])?;
            }
            tx.execute(
                "INSERT INTO language_profiles (name, languages, is_default) VALUES (?, ?, ?)",
                params![name, languages_json, is_default as i64],
            )?;
            let id = tx.last_insert_rowid();
            Ok(LanguageProfile {
                id,
                name: name.to_string(),
                languages: languages.to_vec(),
                is_default,
            })
        })
    }

    fn list(&self) -> Result<Vec<LanguageProfile>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, languages, is_default FROM language_profiles ORDER BY name",
            )?;
            let rows = stmt.query_map([], Self::row_to_profile)?;
            rows.collect()
        })
    }

    fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM series_profile_assignments WHERE profile_id = ?",
                params![id],
            )?;
            tx.execute("DELETE FROM language_profiles WHERE id = ?", params![id])?;
            Ok(())
        })
    }

    fn assign_series(&self, series_id: i64, profile_id: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO series_profile_assignments (series_id, profile_id) VALUES (?, ?)
                 ON CONFLICT(series_id) DO UPDATE SET profile_id = excluded.profile_id",
                params![series_id, profile_id],
            )?;
            Ok(())
        })
    }

    fn unassign_series(&self, series_id: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM series_profile_assignments WHERE series_id = ?",
                params![series_id],
            )?;
            Ok(())
        })
    }

    fn effective_languages(&self, series_id: Option<i64>) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            if let Some(series_id) = series_id {
                let assigned = conn.query_row(
                    "SELECT p.languages FROM language_profiles p
                     JOIN series_profile_assignments a ON a.profile_id = p.id
                     WHERE a.series_id = ?",
                    params![series_id],
                    |row| row.get::<_, String>(0),
                );
                match assigned {
                    Ok(json) => return Ok(serde_json::from_str(&json).unwrap_or_default()),
                    Err(rusqlite::Error::QueryReturnedNoRows) => {}
                    Err(e) => return Err(e),
                }
            }
            let fallback = conn.query_row(
                "SELECT languages FROM language_profiles WHERE is_default = 1 LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            );
            match fallback {
                Ok(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteProfileStore {
        SqliteProfileStore::new(Db::in_memory().unwrap())
    }

    fn langs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_profile_fallback() {
        let store = store();
        store.create("german", &langs(&["de"]), true).unwrap();
        assert_eq!(store.effective_languages(None).unwrap(), langs(&["de"]));
        assert_eq!(store.effective_languages(Some(7)).unwrap(), langs(&["de"]));
    }

    #[test]
    fn test_series_assignment_overrides_default() {
        let store = store();
        store.create("german", &langs(&["de"]), true).unwrap();
        let dual = store.create("dual", &langs(&["de", "fr"]), false).unwrap();
        store.assign_series(7, dual.id).unwrap();

        assert_eq!(
            store.effective_languages(Some(7)).unwrap(),
            langs(&["de", "fr"])
        );
        assert_eq!(store.effective_languages(Some(8)).unwrap(), langs(&["de"]));
    }

    #[test]
    fn test_only_one_default() {
        let store = store();
        store.create("a", &langs(&["de"]), true).unwrap();
        store.create("b", &langs(&["fr"]), true).unwrap();
        let defaults: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .filter(|p| p.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, "b");
    }

    #[test]
    fn test_no_profiles_yields_empty() {
        assert!(store().effective_languages(Some(1)).unwrap().is_empty());
    }

    #[test]
    fn test_delete_clears_assignments() {
        let store = store();
        let p = store.create("x", &langs(&["de"]), false).unwrap();
        store.assign_series(1, p.id).unwrap();
        store.delete(p.id).unwrap();
        assert!(store.effective_languages(Some(1)).unwrap().is_empty());
    }
}
