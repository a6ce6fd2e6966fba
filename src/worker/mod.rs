//! Background phase: job transport and the content worker pool.

pub mod job;
pub mod pool;
pub mod queue;

pub use job::{ContentJob, JobOutcome};
pub use pool::{WorkerConfig, WorkerError, WorkerPool};
pub use queue::{Delivery, InMemoryJobQueue, JobQueue, QueueError};
