//! Periodic rescan and batch-search triggers.
//!
//! Two timers drive the reconciler and the job queue; the startup reconcile
//! runs in the background and never blocks process start.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::jobs::JobQueue;
use crate::store::WantedStore;

use super::reconciler::Reconciler;

#[derive(Debug, Clone)]
pub struct WantedSchedulerConfig {
    pub rescan_interval: Duration,
    pub batch_search_interval: Duration,
    /// Wanted rows enqueued per batch run.
    pub batch_limit: i64,
    /// Base retry delay for the failed-status decay.
    pub retry_base: ChronoDuration,
    /// Exponent cap for the decay backoff.
    pub retry_cap: u32,
    pub max_attempts: u32,
}

impl Default for WantedSchedulerConfig {
    fn default() -> Self {
        Self {
            rescan_interval: Duration::from_secs(6 * 3600),
            batch_search_interval: Duration::from_secs(24 * 3600),
            batch_limit: 50,
            retry_base: ChronoDuration::minutes(30),
            retry_cap: 5,
            max_attempts: 5,
        }
    }
}

pub struct WantedScheduler {
    config: WantedSchedulerConfig,
    reconciler: Arc<Reconciler>,
    wanted: Arc<dyn WantedStore>,
    jobs: Arc<JobQueue>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WantedScheduler {
    pub fn new(
        config: WantedSchedulerConfig,
        reconciler: Arc<Reconciler>,
        wanted: Arc<dyn WantedStore>,
        jobs: Arc<JobQueue>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            reconciler,
            wanted,
            jobs,
            shutdown_tx,
        })
    }

    /// Spawn the timer loops and the startup reconcile.
    pub fn start(self: Arc<Self>) {
        let this = Arc::clone(&self);
        tokio::spawn(async move {
            if let Err(e) = this.reconciler.reconcile(true).await {
                warn!(error = %e, "startup reconcile failed");
            }
        });

        let this = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut rescan = interval(this.config.rescan_interval);
            rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);
            rescan.tick().await; // immediate first tick consumed
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("rescan scheduler stopped");
                        return;
                    }
                    _ = rescan.tick() => {
                        if let Err(e) = this.reconciler.tick().await {
                            warn!(error = %e, "scheduled rescan failed");
                        }
                    }
                }
            }
        });

        let this = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut batch = interval(this.config.batch_search_interval);
            batch.set_missed_tick_behavior(MissedTickBehavior::Delay);
            batch.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("batch-search scheduler stopped");
                        return;
                    }
                    _ = batch.tick() => {
                        this.run_batch_search().await;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Enqueue a search job for every wanted row whose cooldown elapsed.
    /// Concurrency is bounded by the job queue's worker pool.
    pub async fn run_batch_search(&self) {
        if let Err(e) = self.wanted.decay_failed(
            self.config.retry_base,
            self.config.retry_cap,
            self.config.max_attempts,
        ) {
            warn!(error = %e, "failed-status decay failed");
        }

        let due = match self.wanted.due_for_search(
            self.config.retry_base,
            self.config.retry_cap,
            self.config.batch_limit,
        ) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "cannot list wanted items due for search");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        info!(count = due.len(), "batch search enqueueing wanted items");
        for item in due {
            if let Err(e) = self.jobs.enqueue_wanted_search(&item).await {
                warn!(wanted_id = item.id, error = %e, "failed to enqueue wanted search");
            }
        }
    }
}
