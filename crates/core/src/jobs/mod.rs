//! Persistent work queue with a fixed worker pool.

mod queue;
mod types;

pub use queue::{JobQueue, JobQueueConfig};
pub use types::*;
