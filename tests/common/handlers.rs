//! Scripted step handlers and a stub artifact generator.
//!
//! Handlers here are deterministic stand-ins for the LLM-backed steps:
//! validators and reviewers replay a scripted sequence of outcomes, and
//! every handler counts its invocations so resume tests can assert that
//! completed steps are never re-executed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::json;

use courseforge::generate::{ArtifactGenerator, GenerateError, GeneratedArtifact};
use courseforge::model::{
    Concept, ContentKind, CourseModule, CurriculumFramework, EditIntent, EditPlan, ResolvedIntent,
    ReviewDecision, Stage, ValidationResult,
};
use courseforge::pipeline::{StepContext, StepDelta, StepError, StepHandler};
use courseforge::state::TaskState;

/// Shared invocation counter handed out by the scripted handlers.
pub type Calls = Arc<AtomicUsize>;

pub fn calls() -> Calls {
    Arc::new(AtomicUsize::new(0))
}

/// Resolves a fixed intent.
pub struct StubIntent {
    pub calls: Calls,
}

#[async_trait]
impl StepHandler for StubIntent {
    async fn run(&self, _state: &TaskState, _ctx: StepContext) -> Result<StepDelta, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepDelta::new().with_intent(ResolvedIntent {
            roadmap_id: "rm-test".into(),
            topic: "Rust".into(),
            audience: "working developers".into(),
            goals: vec!["ownership".into(), "async".into()],
        }))
    }
}

/// Designs a one-stage framework with a fixed number of concepts.
pub struct StubDesign {
    pub concepts: usize,
    pub calls: Calls,
}

#[async_trait]
impl StepHandler for StubDesign {
    async fn run(&self, state: &TaskState, _ctx: StepContext) -> Result<StepDelta, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let intent = state.intent.as_ref().ok_or(StepError::MissingInput {
            what: "resolved intent",
        })?;
        let concepts: Vec<Concept> = (0..self.concepts)
            .map(|i| {
                let mut c = Concept::new(format!("concept {i}"));
                c.id = format!("c{i}");
                c
            })
            .collect();
        let framework = CurriculumFramework::new(&intent.roadmap_id, &intent.topic).with_stages(
            vec![Stage::new("Stage 1")
                .with_modules(vec![CourseModule::new("Module 1").with_concepts(concepts)])],
        );
        Ok(StepDelta::new().with_framework(framework))
    }
}

/// Replays a scripted sequence of validation scores; the last score
/// repeats once the script runs out.
pub struct ScriptedValidator {
    scores: Mutex<VecDeque<ValidationResult>>,
    last: ValidationResult,
    pub calls: Calls,
}

impl ScriptedValidator {
    pub fn new(results: Vec<ValidationResult>, calls: Calls) -> Self {
        let last = results.last().cloned().unwrap_or_default();
        Self {
            scores: Mutex::new(results.into()),
            last,
            calls,
        }
    }
}

#[async_trait]
impl StepHandler for ScriptedValidator {
    async fn run(&self, _state: &TaskState, _ctx: StepContext) -> Result<StepDelta, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .scores
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.last.clone());
        Ok(StepDelta::new().with_validation(result))
    }
}

/// Turns the latest findings into an edit plan for the active branch.
pub struct StubPlanner {
    pub calls: Calls,
}

#[async_trait]
impl StepHandler for StubPlanner {
    async fn run(&self, state: &TaskState, ctx: StepContext) -> Result<StepDelta, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let branch = ctx.step.branch().ok_or(StepError::MissingInput {
            what: "a branch-tagged step",
        })?;
        let intents = match state.review.as_ref() {
            Some(review) if !review.approved => review
                .feedback
                .iter()
                .map(|f| EditIntent {
                    target: "framework".into(),
                    action: f.clone(),
                })
                .collect(),
            _ => state
                .validation
                .as_ref()
                .map(|v| {
                    v.suggestions
                        .iter()
                        .map(|s| EditIntent {
                            target: s.target.clone(),
                            action: s.action.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };
        Ok(StepDelta::new().with_edit_plan(EditPlan::new(branch, intents, true)))
    }
}

/// Applies the pending plan by bumping the framework title.
pub struct StubEditor {
    pub calls: Calls,
}

#[async_trait]
impl StepHandler for StubEditor {
    async fn run(&self, state: &TaskState, _ctx: StepContext) -> Result<StepDelta, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let plan = state.pending_edit_plan.as_ref().ok_or(StepError::MissingInput {
            what: "a pending edit plan",
        })?;
        let mut framework = state
            .framework
            .clone()
            .ok_or(StepError::MissingInput {
                what: "a curriculum framework",
            })?;
        framework.title = format!("{} (edited x{})", framework.title, plan.intents.len());
        Ok(StepDelta::new().with_framework(framework))
    }
}

/// Replays scripted review decisions; approves once the script runs out.
pub struct ScriptedReviewer {
    decisions: Mutex<VecDeque<ReviewDecision>>,
    pub calls: Calls,
}

impl ScriptedReviewer {
    pub fn new(decisions: Vec<ReviewDecision>, calls: Calls) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            calls,
        }
    }
}

#[async_trait]
impl StepHandler for ScriptedReviewer {
    async fn run(&self, _state: &TaskState, _ctx: StepContext) -> Result<StepDelta, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let decision = self
            .decisions
            .lock()
            .pop_front()
            .unwrap_or_else(ReviewDecision::approve);
        Ok(StepDelta::new().with_review(decision))
    }
}

/// Builds the background job from the checkpointed framework.
pub struct StubDispatcher {
    pub calls: Calls,
}

#[async_trait]
impl StepHandler for StubDispatcher {
    async fn run(&self, state: &TaskState, ctx: StepContext) -> Result<StepDelta, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let framework = state.framework.as_ref().ok_or(StepError::MissingInput {
            what: "a curriculum framework",
        })?;
        Ok(StepDelta::new().with_dispatch(
            courseforge::worker::ContentJob::new(
                ctx.task_id.clone(),
                &framework.roadmap_id,
                framework.concept_ids(),
            ),
        ))
    }
}

/// Fails with a transient error the first `failures` calls, then
/// delegates to the inner handler.
pub struct TransientFirst<H> {
    inner: H,
    remaining: Mutex<u32>,
    pub failures_seen: Calls,
}

impl<H> TransientFirst<H> {
    pub fn new(inner: H, failures: u32) -> Self {
        Self {
            inner,
            remaining: Mutex::new(failures),
            failures_seen: calls(),
        }
    }
}

#[async_trait]
impl<H: StepHandler> StepHandler for TransientFirst<H> {
    async fn run(&self, state: &TaskState, ctx: StepContext) -> Result<StepDelta, StepError> {
        {
            let mut remaining = self.remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                self.failures_seen.fetch_add(1, Ordering::SeqCst);
                return Err(StepError::Transient("upstream briefly unavailable".into()));
            }
        }
        self.inner.run(state, ctx).await
    }
}

/// Always fails with the configured error.
pub struct FailingHandler<F: Fn() -> StepError + Send + Sync> {
    pub make: F,
}

#[async_trait]
impl<F: Fn() -> StepError + Send + Sync> StepHandler for FailingHandler<F> {
    async fn run(&self, _state: &TaskState, _ctx: StepContext) -> Result<StepDelta, StepError> {
        Err((self.make)())
    }
}

/// Deterministic generator: fabricates a JSON body per slot, optionally
/// sleeping first, optionally failing for a configured set of concepts.
#[derive(Default)]
pub struct StubGenerator {
    pub delay: Option<Duration>,
    pub fail_concepts: FxHashSet<String>,
    pub calls: Calls,
}

#[async_trait]
impl ArtifactGenerator for StubGenerator {
    async fn generate(
        &self,
        concept: &Concept,
        kind: ContentKind,
    ) -> Result<GeneratedArtifact, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_concepts.contains(&concept.id) {
            return Err(GenerateError::Provider {
                provider: "stub",
                message: format!("refused {} for {}", kind, concept.id),
            });
        }
        Ok(GeneratedArtifact {
            body: json!({
                "concept": concept.id,
                "kind": kind.as_str(),
                "text": format!("{} content for {}", kind, concept.name),
            }),
            version: 1,
        })
    }
}
