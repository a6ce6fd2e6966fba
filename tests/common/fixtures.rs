//! Assembled engines, worker pools, and model builders for tests.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use courseforge::config::PipelineConfig;
use courseforge::events::{EventChannel, EventChannelConfig, MemorySink};
use courseforge::model::{
    Concept, CourseModule, CurriculumFramework, ImprovementSuggestion, ReviewDecision, Stage,
    ValidationResult,
};
use courseforge::pipeline::{PipelineBuilder, PipelineEngine};
use courseforge::steps::{BranchSource, StepKind};
use courseforge::store::InMemoryTaskStore;
use courseforge::worker::{InMemoryJobQueue, WorkerPool};

use super::handlers::*;

/// A validation pass with the given score and one canned suggestion.
pub fn validation(score: f64) -> ValidationResult {
    ValidationResult {
        overall_score: score,
        suggestions: vec![ImprovementSuggestion {
            target: "Stage 1".into(),
            action: "tighten sequencing".into(),
            rationale: "concepts jump ahead of prerequisites".into(),
        }],
        ..Default::default()
    }
}

/// Framework with `n` concepts (ids `c0..`) in one stage and module.
pub fn framework(n: usize) -> CurriculumFramework {
    let concepts: Vec<Concept> = (0..n)
        .map(|i| {
            let mut c = Concept::new(format!("concept {i}"));
            c.id = format!("c{i}");
            c
        })
        .collect();
    CurriculumFramework::new("rm-test", "Rust").with_stages(vec![Stage::new("Stage 1")
        .with_modules(vec![CourseModule::new("Module 1").with_concepts(concepts)])])
}

/// Per-handler invocation counters.
pub struct HandlerCounts {
    pub intent: Calls,
    pub design: Calls,
    pub validate: Calls,
    pub plan: Calls,
    pub edit: Calls,
    pub review: Calls,
    pub dispatch: Calls,
}

impl HandlerCounts {
    pub fn new() -> Self {
        Self {
            intent: calls(),
            design: calls(),
            validate: calls(),
            plan: calls(),
            edit: calls(),
            review: calls(),
            dispatch: calls(),
        }
    }

    pub fn get(&self, which: &Calls) -> usize {
        which.load(Ordering::SeqCst)
    }
}

/// A fully wired engine over in-memory backends plus handles to
/// everything a test wants to inspect afterwards.
pub struct Harness {
    pub engine: PipelineEngine,
    pub store: Arc<InMemoryTaskStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub sink: MemorySink,
    /// The engine's channel; `stop().await` drains it before asserting
    /// on [`Harness::sink`].
    pub events: EventChannel,
    pub counts: HandlerCounts,
}

/// Build an engine whose validator and reviewer replay the given
/// scripts and whose designed framework has `concepts` concepts.
pub fn harness(
    config: PipelineConfig,
    validations: Vec<ValidationResult>,
    reviews: Vec<ReviewDecision>,
    concepts: usize,
) -> Harness {
    build_harness(config, validations, reviews, concepts, 0)
}

/// Like [`harness`], but the review step fails transiently the first
/// `review_failures` times it runs.
pub fn harness_flaky_review(
    config: PipelineConfig,
    validations: Vec<ValidationResult>,
    reviews: Vec<ReviewDecision>,
    concepts: usize,
    review_failures: u32,
) -> Harness {
    build_harness(config, validations, reviews, concepts, review_failures)
}

fn build_harness(
    config: PipelineConfig,
    validations: Vec<ValidationResult>,
    reviews: Vec<ReviewDecision>,
    concepts: usize,
    review_failures: u32,
) -> Harness {
    let counts = HandlerCounts::new();
    let builder = PipelineBuilder::new()
        .with_handler(
            StepKind::Intent,
            StubIntent {
                calls: counts.intent.clone(),
            },
        )
        .with_handler(
            StepKind::Design,
            StubDesign {
                concepts,
                calls: counts.design.clone(),
            },
        )
        .with_handler(
            StepKind::Validate,
            ScriptedValidator::new(validations, counts.validate.clone()),
        )
        .with_handler(
            StepKind::EditPlan(BranchSource::Validation),
            StubPlanner {
                calls: counts.plan.clone(),
            },
        )
        .with_handler(
            StepKind::EditPlan(BranchSource::Review),
            StubPlanner {
                calls: counts.plan.clone(),
            },
        )
        .with_edit_handler(StubEditor {
            calls: counts.edit.clone(),
        })
        .with_handler(
            StepKind::Review,
            TransientFirst::new(
                ScriptedReviewer::new(reviews, counts.review.clone()),
                review_failures,
            ),
        )
        .with_handler(
            StepKind::ContentDispatch,
            StubDispatcher {
                calls: counts.dispatch.clone(),
            },
        );
    let pipeline = builder.compile().expect("complete pipeline");

    let store = Arc::new(InMemoryTaskStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let sink = MemorySink::new();
    let events = EventChannel::with_sink(EventChannelConfig::default(), sink.clone());
    events.listen();

    let engine = PipelineEngine::new(
        pipeline,
        store.clone(),
        queue.clone(),
        events.clone(),
        config,
    );
    Harness {
        engine,
        store,
        queue,
        sink,
        events,
        counts,
    }
}

/// Worker pool over the harness's store and queue, reusing the
/// harness's event channel.
pub fn worker_pool(
    harness: &Harness,
    generator: StubGenerator,
    config: courseforge::worker::WorkerConfig,
) -> WorkerPool {
    WorkerPool::new(
        harness.store.clone(),
        harness.queue.clone(),
        Arc::new(generator),
        harness.events.clone(),
        config,
    )
}
