//! Job queue seam between the foreground pipeline and the worker pool.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;

use super::job::ContentJob;

/// Errors surfaced by a queue backend.
#[derive(Debug, Error, Diagnostic)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    #[diagnostic(code(courseforge::queue::backend))]
    Backend(String),

    #[error("unknown job delivery: {0}")]
    #[diagnostic(code(courseforge::queue::unknown_delivery))]
    UnknownDelivery(String),
}

/// At-least-once job transport.
///
/// `dequeue` moves a job to an in-flight set; `ack` removes it. A job
/// that is never acked is eligible for redelivery, so consumers must be
/// idempotent.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: ContentJob) -> Result<(), QueueError>;

    /// Next job, or `None` when the queue is empty.
    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery_id: &str) -> Result<(), QueueError>;
}

/// A dequeued job with its redelivery handle.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub delivery_id: String,
    pub job: ContentJob,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ContentJob>,
    in_flight: Vec<(String, ContentJob)>,
}

/// In-process FIFO queue. The default backend for tests and
/// single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs dequeued but not yet acked. Redelivery fodder.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Move every in-flight job back to the ready queue, simulating a
    /// consumer crash before ack.
    pub fn requeue_in_flight(&self) {
        let mut state = self.state.lock();
        let stale: Vec<_> = state.in_flight.drain(..).collect();
        for (_, job) in stale {
            state.ready.push_back(job);
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: ContentJob) -> Result<(), QueueError> {
        self.state.lock().ready.push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock();
        let Some(job) = state.ready.pop_front() else {
            return Ok(None);
        };
        let delivery_id = uuid::Uuid::new_v4().to_string();
        state.in_flight.push((delivery_id.clone(), job.clone()));
        Ok(Some(Delivery { delivery_id, job }))
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let before = state.in_flight.len();
        state.in_flight.retain(|(id, _)| id != delivery_id);
        if state.in_flight.len() == before {
            return Err(QueueError::UnknownDelivery(delivery_id.to_string()));
        }
        Ok(())
    }
}
