//! Provider and backend health counters.
//!
//! Latency is tracked as an exponentially weighted average; consecutive
//! failures feed the circuit breaker and auto-disable logic. All updates are
//! single statements under the store lock, so they are atomic.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::db::Db;
use super::error::StoreError;
use super::jobs::parse_opt_ts;
use super::types::{BackendHealthRecord, ProviderHealthRecord};

/// Weight of the newest sample in the latency average.
const LATENCY_ALPHA: f64 = 0.2;

pub trait HealthStore: Send + Sync {
    fn provider_success(&self, provider: &str, latency_ms: u64) -> Result<(), StoreError>;
    fn provider_failure(&self, provider: &str) -> Result<u32, StoreError>;
    fn set_breaker(
        &self,
        provider: &str,
        state: &str,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    fn set_provider_disabled_until(
        &self,
        provider: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    fn provider(&self, provider: &str) -> Result<Option<ProviderHealthRecord>, StoreError>;
    fn providers(&self) -> Result<Vec<ProviderHealthRecord>, StoreError>;
    /// Operator reset: clears failures, breaker and auto-disable.
    fn reset_provider(&self, provider: &str) -> Result<(), StoreError>;

    fn backend_success(&self, backend: &str, latency_ms: u64) -> Result<(), StoreError>;
    fn backend_failure(&self, backend: &str) -> Result<u32, StoreError>;
    fn set_backend_disabled_until(
        &self,
        backend: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    fn backend(&self, backend: &str) -> Result<Option<BackendHealthRecord>, StoreError>;
    fn backends(&self) -> Result<Vec<BackendHealthRecord>, StoreError>;
}

pub struct SqliteHealthStore {
    db: Db,
}

impl SqliteHealthStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn row_to_provider(row: &Row) -> rusqlite::Result<ProviderHealthRecord> {
        Ok(ProviderHealthRecord {
            provider: row.get(0)?,
            consecutive_failures: row.get(1)?,
            success_count: row.get::<_, i64>(2)? as u64,
            failure_count: row.get::<_, i64>(3)? as u64,
            avg_latency_ms: row.get(4)?,
            breaker_state: row.get(5)?,
            breaker_opened_at: parse_opt_ts(row.get(6)?),
            auto_disabled_until: parse_opt_ts(row.get(7)?),
        })
    }

    fn row_to_backend(row: &Row) -> rusqlite::Result<BackendHealthRecord> {
        Ok(BackendHealthRecord {
            backend: row.get(0)?,
            consecutive_failures: row.get(1)?,
            success_count: row.get::<_, i64>(2)? as u64,
            failure_count: row.get::<_, i64>(3)? as u64,
            avg_latency_ms: row.get(4)?,
            auto_disabled_until: parse_opt_ts(row.get(5)?),
        })
    }
}

const PROVIDER_COLUMNS: &str = "provider, consecutive_failures, success_count, failure_count, avg_latency_ms, breaker_state, breaker_opened_at, auto_disabled_until";
const BACKEND_COLUMNS: &str = "backend, consecutive_failures, success_count, failure_count, avg_latency_ms, auto_disabled_until";

impl HealthStore for SqliteHealthStore {
    fn provider_success(&self, provider: &str, latency_ms: u64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO provider_health (provider, consecutive_failures, success_count, avg_latency_ms)
                 VALUES (?1, 0, 1, ?2)
                 ON CONFLICT(provider) DO UPDATE SET
                     consecutive_failures = 0,
                     success_count = success_count + 1,
                     avg_latency_ms = CASE WHEN success_count = 0 THEN ?2
                         ELSE avg_latency_ms * (1.0 - ?3) + ?2 * ?3 END",
                params![provider, latency_ms as f64, LATENCY_ALPHA],
            )?;
            Ok(())
        })
    }

    fn provider_failure(&self, provider: &str) -> Result<u32, StoreError> {
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO provider_health (provider, consecutive_failures, failure_count)
                 VALUES (?1, 1, 1)
                 ON CONFLICT(provider) DO UPDATE SET
                     consecutive_failures = consecutive_failures + 1,
                     failure_count = failure_count + 1",
                params![provider],
            )?;
            tx.query_row(
                "SELECT consecutive_failures FROM provider_health WHERE provider = ?",
                params![provider],
                |row| row.get(0),
            )
        })
    }

    fn set_breaker(
        &self,
        provider: &str,
        state: &str,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO provider_health (provider, breaker_state, breaker_opened_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(provider) DO UPDATE SET
                     breaker_state = ?2, breaker_opened_at = ?3",
                params![provider, state, opened_at.map(|t| t.to_rfc3339())],
            )?;
            Ok(())
        })
    }

    fn set_provider_disabled_until(
        &self,
        provider: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO provider_health (provider, auto_disabled_until) VALUES (?1, ?2)
                 ON CONFLICT(provider) DO UPDATE SET auto_disabled_until = ?2",
                params![provider, until.map(|t| t.to_rfc3339())],
            )?;
            Ok(())
        })
    }

    fn provider(&self, provider: &str) -> Result<Option<ProviderHealthRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                &format!("SELECT {PROVIDER_COLUMNS} FROM provider_health WHERE provider = ?"),
                params![provider],
                Self::row_to_provider,
            );
            match result {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn providers(&self) -> Result<Vec<ProviderHealthRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROVIDER_COLUMNS} FROM provider_health ORDER BY provider"
            ))?;
            let rows = stmt.query_map([], Self::row_to_provider)?;
            rows.collect()
        })
    }

    fn reset_provider(&self, provider: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE provider_health SET consecutive_failures = 0, breaker_state = 'closed',
                        breaker_opened_at = NULL, auto_disabled_until = NULL
                 WHERE provider = ?",
                params![provider],
            )?;
            Ok(())
        })
    }

    fn backend_success(&self, backend: &str, latency_ms: u64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO backend_health (backend, consecutive_failures, success_count, avg_latency_ms)
                 VALUES (?1, 0, 1, ?2)
                 ON CONFLICT(backend) DO UPDATE SET
                     consecutive_failures = 0,
                     success_count = success_count + 1,
                     avg_latency_ms = CASE WHEN success_count = 0 THEN ?2
                         ELSE avg_latency_ms * (1.0 - ?3) + ?2 * ?3 END",
                params![backend, latency_ms as f64, LATENCY_ALPHA],
            )?;
            Ok(())
        })
    }

    fn backend_failure(&self, backend: &str) -> Result<u32, StoreError> {
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO backend_health (backend, consecutive_failures, failure_count)
                 VALUES (?1, 1, 1)
                 ON CONFLICT(backend) DO UPDATE SET
                     consecutive_failures = consecutive_failures + 1,
                     failure_count = failure_count + 1",
                params![backend],
            )?;
            tx.query_row(
                "SELECT consecutive_failures FROM backend_health WHERE backend = ?",
                params![backend],
                |row| row.get(0),
            )
        })
    }

    fn set_backend_disabled_until(
        &self,
        backend: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO backend_health (backend, auto_disabled_until) VALUES (?1, ?2)
                 ON CONFLICT(backend) DO UPDATE SET auto_disabled_until = ?2",
                params![backend, until.map(|t| t.to_rfc3339())],
            )?;
            Ok(())
        })
    }

    fn backend(&self, backend: &str) -> Result<Option<BackendHealthRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                &format!("SELECT {BACKEND_COLUMNS} FROM backend_health WHERE backend = ?"),
                params![backend],
                Self::row_to_backend,
            );
            match result {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn backends(&self) -> Result<Vec<BackendHealthRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BACKEND_COLUMNS} FROM backend_health ORDER BY backend"
            ))?;
            let rows = stmt.query_map([], Self::row_to_backend)?;
            rows.collect()
        })
    }
}
