//! Background content-generation job descriptors.

use serde::{Deserialize, Serialize};

use crate::model::{ConceptFailure, ConceptId, TaskStatus};

/// Unit of work handed from the dispatch step to the worker pool.
///
/// Delivery is at-least-once: the same job may be enqueued twice when
/// the pipeline resumes across the dispatch checkpoint. Workers make
/// each unit idempotent, so duplicates converge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentJob {
    pub task_id: String,
    pub roadmap_id: String,
    /// Concepts to populate, in framework order.
    pub concept_ids: Vec<ConceptId>,
}

impl ContentJob {
    pub fn new(
        task_id: impl Into<String>,
        roadmap_id: impl Into<String>,
        concept_ids: Vec<ConceptId>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            roadmap_id: roadmap_id.into(),
            concept_ids,
        }
    }
}

/// Result of processing a whole job, mostly for observability and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct JobOutcome {
    pub status: TaskStatus,
    pub completed: usize,
    pub failed: usize,
    pub failures: Vec<ConceptFailure>,
    /// Number of batch flushes issued, including the final remainder.
    pub flushes: usize,
}
