//! The hierarchical concept tree and per-concept content slots.
//!
//! A curriculum framework is a three-level tree: stages contain modules,
//! modules contain concepts. Each concept carries three independent
//! content slots (tutorial, resources, quiz); a slot moves
//! pending → generating → {completed | failed} exactly once per attempt,
//! and a retry begins a new attempt on the same slot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identifier of a single concept, unique within a roadmap.
pub type ConceptId = String;

/// The three content families generated for every concept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Tutorial,
    Resources,
    Quiz,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] =
        [ContentKind::Tutorial, ContentKind::Resources, ContentKind::Quiz];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Tutorial => "tutorial",
            ContentKind::Resources => "resources",
            ContentKind::Quiz => "quiz",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one content slot within the current attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
}

/// Reference to a persisted artifact plus its generation version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: String,
    pub version: u32,
}

/// One content slot of a concept.
///
/// `attempts` counts how many generation attempts have started; the
/// status describes the current attempt only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSlot {
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(default)]
    pub attempts: u32,
}

impl ContentSlot {
    /// Begin a new attempt, resetting the slot to `Generating`.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.status = SlotStatus::Generating;
    }

    /// Complete the current attempt with an artifact reference.
    pub fn complete(&mut self, artifact: ArtifactRef) {
        self.status = SlotStatus::Completed;
        self.artifact = Some(artifact);
    }

    /// Fail the current attempt; any previous artifact reference is kept.
    pub fn fail(&mut self) {
        self.status = SlotStatus::Failed;
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == SlotStatus::Completed
    }
}

/// Leaf of the curriculum tree: one teachable concept with three slots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub name: String,
    #[serde(default)]
    pub tutorial: ContentSlot,
    #[serde(default)]
    pub resources: ContentSlot,
    #[serde(default)]
    pub quiz: ContentSlot,
}

impl Concept {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            tutorial: ContentSlot::default(),
            resources: ContentSlot::default(),
            quiz: ContentSlot::default(),
        }
    }

    pub fn slot(&self, kind: ContentKind) -> &ContentSlot {
        match kind {
            ContentKind::Tutorial => &self.tutorial,
            ContentKind::Resources => &self.resources,
            ContentKind::Quiz => &self.quiz,
        }
    }

    pub fn slot_mut(&mut self, kind: ContentKind) -> &mut ContentSlot {
        match kind {
            ContentKind::Tutorial => &mut self.tutorial,
            ContentKind::Resources => &mut self.resources,
            ContentKind::Quiz => &mut self.quiz,
        }
    }

    /// `true` once all three slots have completed.
    #[must_use]
    pub fn is_fully_populated(&self) -> bool {
        ContentKind::ALL.iter().all(|k| self.slot(*k).is_completed())
    }
}

/// A module groups a handful of related concepts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseModule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

impl CourseModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            concepts: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_concepts(mut self, concepts: Vec<Concept>) -> Self {
        self.concepts = concepts;
        self
    }
}

/// Top level of the tree: an ordered learning stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modules: Vec<CourseModule>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            modules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_modules(mut self, modules: Vec<CourseModule>) -> Self {
        self.modules = modules;
        self
    }
}

/// The denormalized roadmap snapshot: the full Stage > Module > Concept
/// tree for one task. The store persists it as a single document; the
/// worker pool rewrites it wholesale on every flush so readers never see
/// a partial window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurriculumFramework {
    pub roadmap_id: String,
    pub title: String,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl CurriculumFramework {
    pub fn new(roadmap_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            roadmap_id: roadmap_id.into(),
            title: title.into(),
            stages: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    /// Iterate every concept in the tree, stage and module order.
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.stages
            .iter()
            .flat_map(|s| s.modules.iter())
            .flat_map(|m| m.concepts.iter())
    }

    pub fn concepts_mut(&mut self) -> impl Iterator<Item = &mut Concept> {
        self.stages
            .iter_mut()
            .flat_map(|s| s.modules.iter_mut())
            .flat_map(|m| m.concepts.iter_mut())
    }

    pub fn concept_ids(&self) -> Vec<ConceptId> {
        self.concepts().map(|c| c.id.clone()).collect()
    }

    pub fn find_concept_mut(&mut self, id: &str) -> Option<&mut Concept> {
        self.concepts_mut().find(|c| c.id == id)
    }

    /// `true` once every concept's three slots are completed.
    #[must_use]
    pub fn is_fully_populated(&self) -> bool {
        self.concepts().all(Concept::is_fully_populated)
    }
}

/// Free-form artifact payload produced by a generator.
pub type ArtifactBody = Value;

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_framework() -> CurriculumFramework {
        CurriculumFramework::new("rm-1", "Rust").with_stages(vec![Stage::new("Basics")
            .with_modules(vec![CourseModule::new("Ownership")
                .with_concepts(vec![Concept::new("Borrowing"), Concept::new("Lifetimes")])])])
    }

    #[test]
    fn slot_attempt_lifecycle() {
        let mut slot = ContentSlot::default();
        assert_eq!(slot.status, SlotStatus::Pending);
        slot.begin_attempt();
        assert_eq!(slot.status, SlotStatus::Generating);
        assert_eq!(slot.attempts, 1);
        slot.fail();
        assert_eq!(slot.status, SlotStatus::Failed);
        // Retry starts a new attempt on the same slot.
        slot.begin_attempt();
        slot.complete(ArtifactRef {
            artifact_id: "a1".into(),
            version: 2,
        });
        assert_eq!(slot.attempts, 2);
        assert!(slot.is_completed());
    }

    #[test]
    fn framework_iterates_all_concepts() {
        let fw = tiny_framework();
        assert_eq!(fw.concept_ids().len(), 2);
        assert!(!fw.is_fully_populated());
    }
}
