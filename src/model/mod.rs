//! Domain model for curriculum-generation tasks.
//!
//! - [`task`]: the orchestrated [`Task`](task::Task) record, status machine,
//!   and execution summary.
//! - [`concept`]: the Stage > Module > Concept tree with three content
//!   slots per concept.
//! - [`validation`]: curriculum validation scores, issues, and suggestions.
//! - [`edit_plan`]: branch-tagged edit plans produced by the two loops.

pub mod concept;
pub mod edit_plan;
pub mod task;
pub mod validation;

pub use concept::{
    ArtifactRef, Concept, ConceptId, ContentKind, ContentSlot, CourseModule, CurriculumFramework,
    SlotStatus, Stage,
};
pub use edit_plan::{EditIntent, EditPlan, ReviewDecision};
pub use task::{
    ConceptFailure, ExecutionSummary, ResolvedIntent, Task, TaskId, TaskStatus, TaskStatusView,
};
pub use validation::{ImprovementSuggestion, Issue, IssueCategory, Severity, ValidationResult};
