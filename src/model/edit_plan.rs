//! Edit plans and review decisions for the two branch loops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::steps::BranchSource;

/// One intended change inside an edit plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditIntent {
    /// Stage, module, or concept the edit targets.
    pub target: String,
    /// The change to apply.
    pub action: String,
}

/// A plan of edits produced by either a validation failure or a human
/// rejection. A plan is created once per loop iteration and consumed
/// exactly once by the branch's edit step; the engine takes it out of
/// the working state so a second consumption cannot happen silently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditPlan {
    pub id: String,
    /// Which loop produced this plan.
    pub branch: BranchSource,
    pub intents: Vec<EditIntent>,
    /// Whether the planner is confident the edits resolve the findings.
    pub confident: bool,
    pub created_at: DateTime<Utc>,
}

impl EditPlan {
    pub fn new(branch: BranchSource, intents: Vec<EditIntent>, confident: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            branch,
            intents,
            confident,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of the human review step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub approved: bool,
    #[serde(default)]
    pub feedback: Vec<String>,
}

impl ReviewDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            feedback: Vec::new(),
        }
    }

    pub fn reject(feedback: Vec<String>) -> Self {
        Self {
            approved: false,
            feedback,
        }
    }
}
