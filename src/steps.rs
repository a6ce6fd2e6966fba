//! Step identifiers for the fixed pipeline topology.
//!
//! The pipeline is a closed set of steps, not an open string registry:
//! every step the engine can dispatch is a [`StepKind`] variant, and the
//! two branch loops qualify their shared steps with a [`BranchSource`]
//! tag so a revisited step name can never be confused between loops.
//!
//! # Persistence
//!
//! `StepKind` supports serde for checkpointing plus the
//! [`encode`](StepKind::encode)/[`decode`](StepKind::decode) string forms
//! used in task rows and the step log.
//!
//! # Examples
//!
//! ```rust
//! use courseforge::steps::{BranchSource, StepKind};
//!
//! let step = StepKind::Edit(BranchSource::Validation);
//! assert_eq!(step.encode(), "Edit:validation");
//! assert_eq!(StepKind::decode(&step.encode()), Some(step));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which branch loop produced the current edit cycle.
///
/// Both loops run through an edit-plan step and a shared edit step; the
/// source tag travels with the step identity and with the task row so
/// engine and observers always know which loop is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSource {
    /// Automatic re-validation loop (validation score below threshold).
    Validation,
    /// Human-review rejection loop.
    Review,
}

impl BranchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchSource::Validation => "validation",
            BranchSource::Review => "review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation" => Some(BranchSource::Validation),
            "review" => Some(BranchSource::Review),
            _ => None,
        }
    }
}

impl fmt::Display for BranchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one step of the pipeline graph.
///
/// The topology is fixed: Intent → Design → Validate → (validation loop)
/// → Review → (review loop) → ContentDispatch → background phase → Done.
/// [`Done`](StepKind::Done) is a virtual terminal step with no handler;
/// it appears in a task row only together with a terminal status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Resolve the user's stated intent into a roadmap identity.
    Intent,
    /// Design the curriculum framework (stages, modules, concepts).
    Design,
    /// Score the framework and collect issues/suggestions.
    Validate,
    /// Produce an edit plan from a validation failure or review rejection.
    EditPlan(BranchSource),
    /// Apply a consumed edit plan to the framework.
    Edit(BranchSource),
    /// Human review checkpoint.
    Review,
    /// Hand the concept tree to the background worker pool.
    ContentDispatch,
    /// Terminal marker; never dispatched to a handler.
    Done,
}

impl StepKind {
    /// All steps that require a registered handler, in topology order.
    pub const HANDLED: [StepKind; 9] = [
        StepKind::Intent,
        StepKind::Design,
        StepKind::Validate,
        StepKind::EditPlan(BranchSource::Validation),
        StepKind::Edit(BranchSource::Validation),
        StepKind::Review,
        StepKind::EditPlan(BranchSource::Review),
        StepKind::Edit(BranchSource::Review),
        StepKind::ContentDispatch,
    ];

    /// Encode a step into its persisted string form.
    ///
    /// ```rust
    /// # use courseforge::steps::{BranchSource, StepKind};
    /// assert_eq!(StepKind::Validate.encode(), "Validate");
    /// assert_eq!(StepKind::EditPlan(BranchSource::Review).encode(), "EditPlan:review");
    /// ```
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            StepKind::Intent => "Intent".to_string(),
            StepKind::Design => "Design".to_string(),
            StepKind::Validate => "Validate".to_string(),
            StepKind::EditPlan(src) => format!("EditPlan:{src}"),
            StepKind::Edit(src) => format!("Edit:{src}"),
            StepKind::Review => "Review".to_string(),
            StepKind::ContentDispatch => "ContentDispatch".to_string(),
            StepKind::Done => "Done".to_string(),
        }
    }

    /// Decode a persisted string form back into a step.
    ///
    /// Decoding runs over rows this crate wrote, so an unrecognized
    /// form returns `None` and is surfaced by the store as corruption
    /// rather than silently remapped.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "Intent" => Some(StepKind::Intent),
            "Design" => Some(StepKind::Design),
            "Validate" => Some(StepKind::Validate),
            "Review" => Some(StepKind::Review),
            "ContentDispatch" => Some(StepKind::ContentDispatch),
            "Done" => Some(StepKind::Done),
            other => {
                if let Some(rest) = other.strip_prefix("EditPlan:") {
                    BranchSource::parse(rest).map(StepKind::EditPlan)
                } else if let Some(rest) = other.strip_prefix("Edit:") {
                    BranchSource::parse(rest).map(StepKind::Edit)
                } else {
                    None
                }
            }
        }
    }

    /// Returns `true` for the virtual terminal step.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, StepKind::Done)
    }

    /// The branch loop this step belongs to, if any.
    #[must_use]
    pub fn branch(&self) -> Option<BranchSource> {
        match self {
            StepKind::EditPlan(src) | StepKind::Edit(src) => Some(*src),
            _ => None,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for step in StepKind::HANDLED.iter().chain([StepKind::Done].iter()) {
            assert_eq!(StepKind::decode(&step.encode()), Some(*step));
        }
    }

    #[test]
    fn unknown_forms_are_rejected() {
        assert_eq!(StepKind::decode("Edit:unknown"), None);
        assert_eq!(StepKind::decode("Mystery"), None);
    }

    #[test]
    fn branch_tags_disambiguate_shared_steps() {
        let a = StepKind::Edit(BranchSource::Validation);
        let b = StepKind::Edit(BranchSource::Review);
        assert_ne!(a, b);
        assert_eq!(a.branch(), Some(BranchSource::Validation));
        assert_eq!(b.branch(), Some(BranchSource::Review));
    }
}
