//! Durable state.
//!
//! A single SQLite database (WAL mode, one connection behind a process-wide
//! lock) holds jobs, wanted items, download history, config overrides,
//! provider/backend health and the probe cache. Domain code talks to
//! repository traits and receives value copies; swapping in a pooled
//! multi-writer backend only means new trait impls.

mod backup;
mod config_entries;
mod db;
mod error;
mod health;
mod history;
mod jobs;
mod probe_cache;
mod profiles;
mod types;
mod wanted;

pub use backup::BackupManager;
pub use config_entries::{ConfigStore, SqliteConfigStore};
pub use db::Db;
pub use error::StoreError;
pub use health::{HealthStore, SqliteHealthStore};
pub use history::{DownloadInsert, HistoryStore, SqliteHistoryStore};
pub use jobs::{JobFilter, JobStore, SqliteJobStore};
pub use probe_cache::SqliteProbeCache;
pub use profiles::{ProfileStore, SqliteProfileStore};
pub use types::*;
pub use wanted::{SqliteWantedStore, WantedFilter, WantedStore, WantedUpsert};
