//! Database backup rotation.
//!
//! Snapshots are taken with `VACUUM INTO` after an integrity check and kept
//! under `backups/` with daily/weekly/monthly retention.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, Utc};
use tracing::{info, warn};

use super::db::Db;
use super::error::StoreError;

/// Retention counts per tier.
const KEEP_DAILY: usize = 7;
const KEEP_WEEKLY: usize = 4;
const KEEP_MONTHLY: usize = 12;

pub struct BackupManager {
    db: Db,
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(db: Db, dir: PathBuf) -> Self {
        Self { db, dir }
    }

    /// Take today's snapshot (if not already present) and prune old ones.
    pub fn run(&self) -> Result<PathBuf, StoreError> {
        if !self.db.integrity_ok()? {
            return Err(StoreError::Corrupted(
                "integrity check failed, refusing to rotate backups".to_string(),
            ));
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::Database(format!("cannot create backup dir: {e}")))?;

        let today = Utc::now().date_naive();
        let target = self.dir.join(format!("sublarr-{today}.db"));
        if !target.exists() {
            self.snapshot(&target)?;
            info!(path = %target.display(), "database backup written");
        }

        self.prune(today);
        Ok(target)
    }

    fn snapshot(&self, target: &Path) -> Result<(), StoreError> {
        let target_str = target.to_string_lossy().replace('\'', "''");
        self.db.with_conn(|conn| {
            conn.execute_batch(&format!("VACUUM INTO '{target_str}';"))?;
            Ok(())
        })
    }

    /// Keep the last 7 dailies, the last 4 Mondays, and the last 12 month
    /// firsts; delete everything else.
    fn prune(&self, today: NaiveDate) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot read backup dir");
                return;
            }
        };

        let mut dated: Vec<(NaiveDate, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let date = name
                    .strip_prefix("sublarr-")?
                    .strip_suffix(".db")?
                    .parse::<NaiveDate>()
                    .ok()?;
                Some((date, entry.path()))
            })
            .collect();
        dated.sort_by_key(|(date, _)| *date);
        dated.reverse();

        let mut daily = 0usize;
        let mut weekly = 0usize;
        let mut monthly = 0usize;
        for (date, path) in dated {
            let age_days = (today - date).num_days();
            let keep = if age_days <= 0 || daily < KEEP_DAILY {
                daily += 1;
                true
            } else if date.weekday() == chrono::Weekday::Mon && weekly < KEEP_WEEKLY {
                weekly += 1;
                true
            } else if date.day() == 1 && monthly < KEEP_MONTHLY {
                monthly += 1;
                true
            } else {
                false
            };
            if !keep {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to prune backup");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_creates_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sublarr.db");
        let db = Db::open(&db_path).unwrap();
        let manager = BackupManager::new(db, dir.path().join("backups"));

        let path = manager.run().unwrap();
        assert!(path.exists());
        // Second run is idempotent for the same day.
        let path2 = manager.run().unwrap();
        assert_eq!(path, path2);
    }

    #[test]
    fn test_snapshot_is_openable() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(&dir.path().join("sublarr.db")).unwrap();
        let manager = BackupManager::new(db, dir.path().join("backups"));
        let path = manager.run().unwrap();

        let restored = Db::open(&path).unwrap();
        assert!(restored.integrity_ok().unwrap());
    }

    #[test]
    fn test_prune_keeps_recent_dailies() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();

        // 30 consecutive dailies.
        for offset in 0..30 {
            let date = today - chrono::Duration::days(offset);
            std::fs::write(backups.join(format!("sublarr-{date}.db")), b"x").unwrap();
        }

        let db = Db::in_memory().unwrap();
        let manager = BackupManager::new(db, backups.clone());
        manager.prune(today);

        let remaining = std::fs::read_dir(&backups).unwrap().count();
        // 7 dailies plus the Monday/month-first survivors from the rest.
        assert!(remaining >= KEEP_DAILY);
        assert!(remaining < 30);
    }

    #[test]
    fn test_unrelated_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(backups.join("notes.txt"), b"keep me").unwrap();

        let manager = BackupManager::new(Db::in_memory().unwrap(), backups.clone());
        manager.prune(NaiveDate::from_ymd_opt(2026, 8, 1).unwrap());

        assert!(backups.join("notes.txt").exists());
    }
}
