//! Job repository.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::db::Db;
use super::error::StoreError;
use super::types::{Job, JobKind, JobState};

/// Filter for job listings.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub kind: Option<JobKind>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            state: None,
            kind: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Repository for job rows.
pub trait JobStore: Send + Sync {
    fn create(
        &self,
        kind: JobKind,
        file_path: &str,
        target_language: &str,
        payload: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<Job, StoreError>;

    fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    fn count(&self, filter: &JobFilter) -> Result<i64, StoreError>;

    /// Atomically claim the oldest queued job: transition to `running` under
    /// a lease. Returns `None` when the queue is empty.
    fn claim_next(&self, lease: Duration) -> Result<Option<Job>, StoreError>;

    fn renew_lease(&self, id: &str, lease: Duration) -> Result<(), StoreError>;

    /// Raise the progress fraction. A value below the stored one is ignored,
    /// keeping progress monotonic.
    fn set_progress(&self, id: &str, fraction: f32) -> Result<(), StoreError>;

    /// Transition to a terminal (or running) state, enforcing the DAG.
    fn transition(
        &self,
        id: &str,
        next: JobState,
        error: Option<&str>,
    ) -> Result<Job, StoreError>;

    /// Sweep `running` rows created before `started_before` to
    /// `failed(interrupted)`. Run once at startup.
    fn sweep_interrupted(&self, started_before: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Fail `running` rows whose lease expired (`worker_dead`).
    fn expire_leases(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Remove terminal rows older than the retention window.
    fn prune_finished(&self, older_than_days: i64) -> Result<usize, StoreError>;
}

pub struct SqliteJobStore {
    db: Db,
}

impl SqliteJobStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
        let kind_str: String = row.get(1)?;
        let state_str: String = row.get(2)?;
        Ok(Job {
            id: row.get(0)?,
            kind: JobKind::parse(&kind_str).unwrap_or(JobKind::Translate),
            state: JobState::parse(&state_str).unwrap_or(JobState::Failed),
            file_path: row.get(3)?,
            target_language: row.get(4)?,
            payload: row.get(5)?,
            progress: row.get(6)?,
            error: row.get(7)?,
            fingerprint: row.get(8)?,
            lease_expires_at: parse_opt_ts(row.get::<_, Option<String>>(9)?),
            created_at: parse_ts(row.get::<_, String>(10)?),
            updated_at: parse_ts(row.get::<_, String>(11)?),
            completed_at: parse_opt_ts(row.get::<_, Option<String>>(12)?),
        })
    }
}

const JOB_COLUMNS: &str = "id, kind, state, file_path, target_language, payload, progress, error, fingerprint, lease_expires_at, created_at, updated_at, completed_at";

pub(crate) fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

impl JobStore for SqliteJobStore {
    fn create(
        &self,
        kind: JobKind,
        file_path: &str,
        target_language: &str,
        payload: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<Job, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, kind, state, file_path, target_language, payload, progress, fingerprint, created_at, updated_at)
                 VALUES (?, ?, 'queued', ?, ?, ?, 0, ?, ?, ?)",
                params![
                    id,
                    kind.as_str(),
                    file_path,
                    target_language,
                    payload,
                    fingerprint,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        Ok(Job {
            id,
            kind,
            state: JobState::Queued,
            file_path: file_path.to_string(),
            target_language: target_language.to_string(),
            payload: payload.map(String::from),
            progress: 0.0,
            error: None,
            fingerprint: fingerprint.map(String::from),
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let result = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"),
                params![id],
                Self::row_to_job,
            )
        });
        match result {
            Ok(job) => Ok(Some(job)),
            Err(StoreError::Database(msg)) if msg.contains("no rows") => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let state = filter.state.map(|s| s.as_str().to_string());
        let kind = filter.kind.map(|k| k.as_str().to_string());
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE (?1 IS NULL OR state = ?1) AND (?2 IS NULL OR kind = ?2)
                 ORDER BY created_at DESC LIMIT ?3 OFFSET ?4"
            ))?;
            let rows = stmt.query_map(
                params![state, kind, filter.limit, filter.offset],
                Self::row_to_job,
            )?;
            rows.collect()
        })
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, StoreError> {
        let state = filter.state.map(|s| s.as_str().to_string());
        let kind = filter.kind.map(|k| k.as_str().to_string());
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM jobs
                 WHERE (?1 IS NULL OR state = ?1) AND (?2 IS NULL OR kind = ?2)",
                params![state, kind],
                |row| row.get(0),
            )
        })
    }

    fn claim_next(&self, lease: Duration) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();
        let lease_until = (now + lease).to_rfc3339();
        self.db.with_tx(|tx| {
            let candidate = tx.query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = 'queued'
                     ORDER BY created_at ASC LIMIT 1"
                ),
                [],
                Self::row_to_job,
            );
            let mut job = match candidate {
                Ok(job) => job,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e),
            };
            tx.execute(
                "UPDATE jobs SET state = 'running', lease_expires_at = ?, updated_at = ? WHERE id = ?",
                params![lease_until, now.to_rfc3339(), job.id],
            )?;
            job.state = JobState::Running;
            job.lease_expires_at = parse_opt_ts(Some(lease_until.clone()));
            job.updated_at = now;
            Ok(Some(job))
        })
    }

    fn renew_lease(&self, id: &str, lease: Duration) -> Result<(), StoreError> {
        let now = Utc::now();
        let affected = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET lease_expires_at = ?, updated_at = ? WHERE id = ? AND state = 'running'",
                params![(now + lease).to_rfc3339(), now.to_rfc3339(), id],
            )
        })?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("running job {id}")));
        }
        Ok(())
    }

    fn set_progress(&self, id: &str, fraction: f32) -> Result<(), StoreError> {
        let fraction = fraction.clamp(0.0, 1.0);
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET progress = MAX(progress, ?), updated_at = ? WHERE id = ?",
                params![fraction as f64, Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
    }

    fn transition(
        &self,
        id: &str,
        next: JobState,
        error: Option<&str>,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        self.db.with_tx(|tx| {
            let current = tx.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"),
                params![id],
                Self::row_to_job,
            );
            let mut job = match current {
                Ok(job) => job,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(rusqlite::Error::QueryReturnedNoRows)
                }
                Err(e) => return Err(e),
            };
            if !job.state.can_transition_to(next) {
                // Surfaced as an integrity error by the caller mapping below.
                return Err(rusqlite::Error::IntegralValueOutOfRange(0, 0));
            }
            let completed_at = if next.is_terminal() {
                Some(now.to_rfc3339())
            } else {
                None
            };
            tx.execute(
                "UPDATE jobs SET state = ?, error = ?, lease_expires_at = NULL, updated_at = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
                params![next.as_str(), error, now.to_rfc3339(), completed_at, id],
            )?;
            job.state = next;
            job.error = error.map(String::from);
            job.lease_expires_at = None;
            job.updated_at = now;
            if next.is_terminal() {
                job.completed_at = Some(now);
            }
            Ok(job)
        })
        .map_err(|e| match e {
            StoreError::Database(msg) if msg.contains("no rows") => {
                StoreError::NotFound(format!("job {id}"))
            }
            StoreError::Database(msg) if msg.contains("out of range") => {
                StoreError::InvalidState {
                    entity: "job",
                    id: id.to_string(),
                    current: "terminal".to_string(),
                    operation: "transition",
                }
            }
            other => other,
        })
    }

    fn sweep_interrupted(&self, started_before: DateTime<Utc>) -> Result<usize, StoreError> {
        let now = Utc::now();
        self.db.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE jobs SET state = 'failed', error = 'interrupted', lease_expires_at = NULL,
                        updated_at = ?, completed_at = ?
                 WHERE state = 'running' AND updated_at < ?",
                params![
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    started_before.to_rfc3339()
                ],
            )?;
            Ok(affected)
        })
    }

    fn expire_leases(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE jobs SET state = 'failed', error = 'worker_dead', lease_expires_at = NULL,
                        updated_at = ?, completed_at = ?
                 WHERE state = 'running' AND lease_expires_at IS NOT NULL AND lease_expires_at < ?",
                params![now.to_rfc3339(), now.to_rfc3339(), now.to_rfc3339()],
            )?;
            Ok(affected)
        })
    }

    fn prune_finished(&self, older_than_days: i64) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        self.db.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM jobs WHERE state IN ('completed', 'failed', 'cancelled')
                 AND completed_at IS NOT NULL AND completed_at < ?",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(affected)
        })
    }
}
