//! Curriculum validation outcomes.
//!
//! A [`ValidationResult`] carries one overall score, per-dimension
//! scores, descriptive [`Issue`]s, and actionable
//! [`ImprovementSuggestion`]s. Issues describe what is wrong;
//! suggestions describe what to change — the edit-plan step consumes
//! the latter, the review step surfaces the former.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Issue severity. Critical issues survive the retry cap and are carried
/// into review instead of failing the task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

/// Broad category a validation issue falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Structure,
    Coverage,
    Sequencing,
    Clarity,
}

/// Descriptive finding about the framework.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub message: String,
}

impl Issue {
    pub fn critical(category: IssueCategory, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Critical,
            category,
            message: message.into(),
        }
    }

    pub fn warning(category: IssueCategory, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category,
            message: message.into(),
        }
    }
}

/// Actionable change request, distinct from the descriptive issue list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSuggestion {
    /// What part of the framework the suggestion targets (stage, module,
    /// or concept name).
    pub target: String,
    /// The change to make.
    pub action: String,
    /// Why the change helps.
    pub rationale: String,
}

/// Result of one validation pass over the framework.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub overall_score: f64,
    #[serde(default)]
    pub dimension_scores: FxHashMap<String, f64>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub suggestions: Vec<ImprovementSuggestion>,
}

impl ValidationResult {
    /// Whether the pass clears the configured threshold.
    #[must_use]
    pub fn passed(&self, threshold: f64) -> bool {
        self.overall_score >= threshold
    }

    /// Critical issues only, for embedding into review context when the
    /// retry cap is exhausted.
    pub fn critical_issues(&self) -> Vec<Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_and_critical_filter() {
        let result = ValidationResult {
            overall_score: 0.72,
            dimension_scores: FxHashMap::default(),
            issues: vec![
                Issue::critical(IssueCategory::Coverage, "missing async module"),
                Issue::warning(IssueCategory::Clarity, "stage name vague"),
            ],
            suggestions: vec![],
        };
        assert!(result.passed(0.7));
        assert!(!result.passed(0.8));
        assert_eq!(result.critical_issues().len(), 1);
    }
}
