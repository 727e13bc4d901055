//! Worker pool over the persistent job store.
//!
//! Workers claim queued rows under a lease, execute the acquisition
//! pipeline, renew the lease while running, and publish lifecycle events.
//! On boot, stale `running` rows are swept to `failed(interrupted)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventBus, JobPhase};
use crate::pipeline::{AcquireOutcome, AcquireRequest, AcquisitionPipeline, ProgressFn};
use crate::store::{Job, JobKind, JobState, JobStore, SubtitleType, WantedStore};

use super::types::{BatchOutcome, JobError, JobPayload};

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub workers: usize,
    pub lease: chrono::Duration,
    pub lease_renew_interval: Duration,
    pub poll_interval: Duration,
    /// Hard ceiling on a single job's runtime.
    pub job_deadline: Duration,
    /// Grace period for in-flight jobs during shutdown.
    pub shutdown_grace: Duration,
    /// Source language assumed for translation sources.
    pub source_language: String,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            lease: chrono::Duration::minutes(2),
            lease_renew_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            job_deadline: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(30),
            source_language: "en".to_string(),
        }
    }
}

pub struct JobQueue {
    config: JobQueueConfig,
    store: Arc<dyn JobStore>,
    wanted: Arc<dyn WantedStore>,
    pipeline: Arc<AcquisitionPipeline>,
    events: Arc<EventBus>,
    cancels: Mutex<HashMap<String, Arc<AtomicBool>>>,
    accepting: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobQueue {
    pub fn new(
        config: JobQueueConfig,
        store: Arc<dyn JobStore>,
        wanted: Arc<dyn WantedStore>,
        pipeline: Arc<AcquisitionPipeline>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            store,
            wanted,
            pipeline,
            events,
            cancels: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            shutdown_tx,
        })
    }

    /// Sweep interrupted rows and spawn the worker pool.
    pub fn start(self: Arc<Self>) {
        match self.store.sweep_interrupted(Utc::now()) {
            Ok(0) => {}
            Ok(swept) => info!(swept, "swept interrupted jobs from previous run"),
            Err(e) => error!(error = %e, "startup job sweep failed"),
        }

        for worker_id in 0..self.config.workers.max(1) {
            let this = Arc::clone(&self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                debug!(worker_id, "job worker started");
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!(worker_id, "job worker stopped");
                            return;
                        }
                        _ = tokio::time::sleep(this.config.poll_interval) => {
                            if !this.accepting.load(Ordering::Relaxed) {
                                continue;
                            }
                            match this.store.claim_next(this.config.lease) {
                                Ok(Some(job)) => this.execute(job).await,
                                Ok(None) => {}
                                Err(e) => warn!(error = %e, "job claim failed"),
                            }
                        }
                    }
                }
            });
        }

        // Lease reaper: jobs whose worker died get failed out.
        let this = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = tokio::time::sleep(this.config.lease_renew_interval) => {
                        match this.store.expire_leases(Utc::now()) {
                            Ok(0) => {}
                            Ok(expired) => warn!(expired, "expired dead-worker leases"),
                            Err(e) => warn!(error = %e, "lease expiry sweep failed"),
                        }
                    }
                }
            }
        });
    }

    /// Graceful shutdown: stop claiming, flag all running jobs for
    /// cancellation, give them the grace period.
    pub async fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        {
            let cancels = self.cancels.lock().await;
            for flag in cancels.values() {
                flag.store(true, Ordering::SeqCst);
            }
        }
        let deadline = Instant::now() + self.config.shutdown_grace;
        loop {
            if self.cancels.lock().await.is_empty() || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let _ = self.shutdown_tx.send(());
    }

    pub async fn enqueue_translate(
        &self,
        file_path: &str,
        target_language: &str,
        force: bool,
    ) -> Result<Job, JobError> {
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(JobError::ShuttingDown);
        }
        let payload = JobPayload {
            force,
            ..Default::default()
        };
        let job = self.store.create(
            JobKind::Translate,
            file_path,
            target_language,
            Some(&payload.encode()),
            None,
        )?;
        self.publish_created(&job);
        Ok(job)
    }

    pub async fn enqueue_batch(
        &self,
        paths: &[String],
        target_language: &str,
    ) -> Result<Job, JobError> {
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(JobError::ShuttingDown);
        }
        let payload = JobPayload {
            paths: Some(paths.to_vec()),
            ..Default::default()
        };
        let job = self.store.create(
            JobKind::Batch,
            paths.first().map(String::as_str).unwrap_or(""),
            target_language,
            Some(&payload.encode()),
            None,
        )?;
        self.publish_created(&job);
        Ok(job)
    }

    pub async fn enqueue_wanted_search(
        &self,
        item: &crate::store::WantedItem,
    ) -> Result<Job, JobError> {
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(JobError::ShuttingDown);
        }
        let payload = JobPayload {
            wanted_id: Some(item.id),
            series_id: item.series_id,
            subtitle_type: Some(item.subtitle_type),
            ..Default::default()
        };
        let job = self.store.create(
            JobKind::WantedSearch,
            &item.file_path,
            &item.target_language,
            Some(&payload.encode()),
            None,
        )?;
        self.publish_created(&job);
        Ok(job)
    }

    /// Request cancellation. Queued jobs cancel immediately; running jobs
    /// observe the flag at their next checkpoint.
    pub async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let job = self
            .store
            .get(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        match job.state {
            JobState::Queued => {
                self.store.transition(job_id, JobState::Cancelled, None)?;
                self.events.publish(Event::JobCancelled {
                    job_id: job_id.to_string(),
                });
                Ok(())
            }
            JobState::Running => {
                if let Some(flag) = self.cancels.lock().await.get(job_id) {
                    flag.store(true, Ordering::SeqCst);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn publish_created(&self, job: &Job) {
        self.events.publish(Event::JobCreated {
            job_id: job.id.clone(),
            kind: job.kind.as_str().to_string(),
            file_path: job.file_path.clone(),
            target_language: job.target_language.clone(),
        });
    }

    async fn execute(&self, job: Job) {
        let started = Instant::now();
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels
            .lock()
            .await
            .insert(job.id.clone(), Arc::clone(&cancel));
        self.events.publish(Event::JobStarted {
            job_id: job.id.clone(),
        });

        // Keep the lease alive while the job runs.
        let renew_store = Arc::clone(&self.store);
        let renew_id = job.id.clone();
        let renew_lease = self.config.lease;
        let renew_interval = self.config.lease_renew_interval;
        let renewer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(renew_interval).await;
                if renew_store.renew_lease(&renew_id, renew_lease).is_err() {
                    return;
                }
            }
        });

        // Panics stop at the job boundary: the row fails, the worker lives.
        let guarded = std::panic::AssertUnwindSafe(self.run_job(&job, Arc::clone(&cancel)))
            .catch_unwind();
        let outcome = tokio::time::timeout(self.config.job_deadline, guarded).await;
        renewer.abort();
        self.cancels.lock().await.remove(&job.id);

        let (state, error, output_path, summary) = match outcome {
            Ok(Ok(JobRun::Completed { outcome, path })) => {
                (JobState::Completed, None, path, outcome)
            }
            Ok(Ok(JobRun::Cancelled)) => {
                (JobState::Cancelled, None, None, "cancelled".to_string())
            }
            Ok(Ok(JobRun::Failed { reason })) => {
                (JobState::Failed, Some(reason.clone()), None, reason)
            }
            Ok(Err(_panic)) => {
                error!(job_id = %job.id, "job panicked");
                let reason = "job panicked".to_string();
                (JobState::Failed, Some(reason.clone()), None, reason)
            }
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                let reason = "job deadline exceeded".to_string();
                (JobState::Failed, Some(reason.clone()), None, reason)
            }
        };

        if let Err(e) = self.store.transition(&job.id, state, error.as_deref()) {
            warn!(job_id = %job.id, error = %e, "job state transition failed");
        }
        crate::metrics::JOBS_FINISHED
            .with_label_values(&[job.kind.as_str(), state.as_str()])
            .inc();
        crate::metrics::JOB_DURATION
            .with_label_values(&[job.kind.as_str()])
            .observe(started.elapsed().as_secs_f64());
        match state {
            JobState::Completed => {
                self.store.set_progress(&job.id, 1.0).ok();
                self.events.publish(Event::JobCompleted {
                    job_id: job.id.clone(),
                    outcome: summary,
                    output_path,
                });
            }
            JobState::Cancelled => self.events.publish(Event::JobCancelled {
                job_id: job.id.clone(),
            }),
            _ => self.events.publish(Event::JobFailed {
                job_id: job.id.clone(),
                error: error.unwrap_or_default(),
            }),
        }
    }

    async fn run_job(&self, job: &Job, cancel: Arc<AtomicBool>) -> JobRun {
        let payload = JobPayload::decode(job.payload.as_deref());
        match job.kind {
            JobKind::Translate => {
                self.run_single(job, &payload, cancel, payload.force).await
            }
            JobKind::WantedSearch => self.run_wanted_search(job, &payload, cancel).await,
            JobKind::Batch => self.run_batch(job, &payload, cancel).await,
        }
    }

    fn progress_fn(&self, job_id: &str) -> ProgressFn {
        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let job_id = job_id.to_string();
        Arc::new(move |fraction: f32, phase: JobPhase| {
            store.set_progress(&job_id, fraction).ok();
            events.publish(Event::JobProgress {
                job_id: job_id.clone(),
                fraction,
                phase,
            });
        })
    }

    async fn run_single(
        &self,
        job: &Job,
        payload: &JobPayload,
        cancel: Arc<AtomicBool>,
        force: bool,
    ) -> JobRun {
        let mut request = AcquireRequest::new(
            job.file_path.clone(),
            job.target_language.clone(),
            self.config.source_language.clone(),
        );
        request.force = force;
        request.subtitle_type = payload.subtitle_type.unwrap_or(SubtitleType::Normal);
        request.series_id = payload.series_id;
        request.cancel = Some(Arc::clone(&cancel));

        let outcome = self
            .pipeline
            .acquire(request, Some(self.progress_fn(&job.id)))
            .await;
        JobRun::from_outcome(outcome, &cancel)
    }

    async fn run_wanted_search(
        &self,
        job: &Job,
        payload: &JobPayload,
        cancel: Arc<AtomicBool>,
    ) -> JobRun {
        let wanted_id = payload.wanted_id;
        if let Some(id) = wanted_id {
            if let Err(e) = self
                .wanted
                .set_status(id, crate::store::WantedStatus::Searching)
            {
                warn!(wanted_id = id, error = %e, "cannot mark wanted row searching");
            }
        }

        let run = self.run_single(job, payload, cancel, false).await;

        if let Some(id) = wanted_id {
            let (found, error) = match &run {
                JobRun::Completed { .. } => (true, None),
                JobRun::Cancelled => (false, Some("cancelled".to_string())),
                JobRun::Failed { reason } => (false, Some(reason.clone())),
            };
            match self.wanted.record_attempt(id, found, error.as_deref()) {
                Ok(_) => self.events.publish(Event::WantedSearchCompleted {
                    wanted_id: id,
                    found,
                }),
                Err(e) => warn!(wanted_id = id, error = %e, "cannot record search attempt"),
            }
        }
        run
    }

    async fn run_batch(
        &self,
        job: &Job,
        payload: &JobPayload,
        cancel: Arc<AtomicBool>,
    ) -> JobRun {
        let paths = payload.paths.clone().unwrap_or_default();
        let total = paths.len();
        let mut outcome = BatchOutcome::default();

        for (i, path) in paths.iter().enumerate() {
            // Batch boundary: the documented cancellation checkpoint.
            if cancel.load(Ordering::Relaxed) {
                return JobRun::Cancelled;
            }
            let mut request = AcquireRequest::new(
                path.clone(),
                job.target_language.clone(),
                self.config.source_language.clone(),
            );
            request.cancel = Some(Arc::clone(&cancel));
            match self.pipeline.acquire(request, None).await {
                AcquireOutcome::Acquired { .. } => outcome.succeeded += 1,
                AcquireOutcome::Skipped { .. } => outcome.skipped += 1,
                AcquireOutcome::Failed { code, .. } if code == "PIPELINE_CANCELLED" => {
                    return JobRun::Cancelled;
                }
                AcquireOutcome::Failed { .. } => outcome.failed += 1,
            }
            self.store
                .set_progress(&job.id, (i + 1) as f32 / total.max(1) as f32)
                .ok();
            self.events.publish(Event::BatchProgress {
                job_id: job.id.clone(),
                completed: outcome.succeeded,
                skipped: outcome.skipped,
                failed: outcome.failed,
                total,
            });
        }

        // An all-skipped batch is a success; the split stays visible.
        if outcome.is_success() {
            JobRun::Completed {
                outcome: format!(
                    "batch: {} acquired, {} skipped, {} failed",
                    outcome.succeeded, outcome.skipped, outcome.failed
                ),
                path: None,
            }
        } else {
            JobRun::Failed {
                reason: format!("all {} batch items failed", outcome.failed),
            }
        }
    }
}

enum JobRun {
    Completed { outcome: String, path: Option<String> },
    Cancelled,
    Failed { reason: String },
}

impl JobRun {
    fn from_outcome(outcome: AcquireOutcome, cancel: &AtomicBool) -> Self {
        match outcome {
            AcquireOutcome::Acquired { source, path, .. } => JobRun::Completed {
                outcome: format!("acquired:{}", source.as_str()),
                path: Some(path),
            },
            AcquireOutcome::Skipped { reason, path } => JobRun::Completed {
                outcome: format!("skipped: {reason}"),
                path,
            },
            AcquireOutcome::Failed { code, reason } => {
                if code == "PIPELINE_CANCELLED" || cancel.load(Ordering::Relaxed) {
                    JobRun::Cancelled
                } else {
                    JobRun::Failed { reason }
                }
            }
        }
    }
}
