//! Wanted-item reconciliation and scheduling.

mod reconciler;
mod scheduler;

pub use reconciler::{Reconciler, ReconcilerConfig, ScanSummary, WantedError};
pub use scheduler::{WantedScheduler, WantedSchedulerConfig};
