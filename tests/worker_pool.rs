mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use courseforge::events::{EventChannel, EventChannelConfig, MemorySink};
use courseforge::model::{ContentKind, SlotStatus, Task, TaskStatus};
use courseforge::steps::StepKind;
use courseforge::store::{InMemoryTaskStore, TaskStore};
use courseforge::worker::{ContentJob, InMemoryJobQueue, JobQueue, WorkerConfig, WorkerPool};
use rustc_hash::FxHashSet;

struct Rig {
    pool: WorkerPool,
    store: Arc<InMemoryTaskStore>,
    queue: Arc<InMemoryJobQueue>,
    sink: MemorySink,
    events: EventChannel,
    job: ContentJob,
    generator_calls: Calls,
}

/// Store seeded with a mid-pipeline task and an `n`-concept framework,
/// plus a pool over a stub generator.
async fn rig(n: usize, generator: StubGenerator, config: WorkerConfig) -> Rig {
    let store = Arc::new(InMemoryTaskStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let sink = MemorySink::new();
    let events = EventChannel::with_sink(EventChannelConfig::default(), sink.clone());
    events.listen();

    let mut task = Task::new("alice");
    task.status = TaskStatus::Processing;
    task.current_step = StepKind::ContentDispatch;
    task.roadmap_id = Some("rm-test".into());
    store.create_task(&task).await.unwrap();

    let fw = framework(n);
    let job = ContentJob::new(&task.id, "rm-test", fw.concept_ids());
    store.put_framework(fw);

    let generator_calls = generator.calls.clone();
    let pool = WorkerPool::new(
        store.clone(),
        queue.clone(),
        Arc::new(generator),
        events.clone(),
        config,
    );
    Rig {
        pool,
        store,
        queue,
        sink,
        events,
        job,
        generator_calls,
    }
}

#[tokio::test]
async fn twenty_five_concepts_land_in_three_batches() {
    let r = rig(25, StubGenerator::default(), WorkerConfig::default()).await;
    let outcome = r.pool.run_job(&r.job).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.completed, 25);
    assert_eq!(outcome.failed, 0);
    // Two full batches of 10 concepts plus the remainder of 5; each
    // concept contributes three artifact rows.
    assert_eq!(outcome.flushes, 3);
    assert_eq!(r.store.flush_sizes(), vec![30, 30, 15]);
    assert_eq!(r.store.artifact_count(), 75);

    let view = r.store.status(&r.job.task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.current_step, StepKind::Done);
}

#[tokio::test]
async fn flushed_framework_snapshot_reflects_all_landed_concepts() {
    let r = rig(4, StubGenerator::default(), WorkerConfig::default()).await;
    r.pool.run_job(&r.job).await.unwrap();

    let fw = r.store.load_framework("rm-test").await.unwrap();
    assert!(fw.is_fully_populated());
    for concept in fw.concepts() {
        for kind in ContentKind::ALL {
            let slot = concept.slot(kind);
            assert!(slot.is_completed());
            let artifact = slot.artifact.as_ref().expect("artifact ref");
            let row = r.store.artifact(&concept.id, kind).expect("artifact row");
            assert_eq!(row.artifact_id, artifact.artifact_id);
        }
    }
}

#[tokio::test]
async fn failed_units_are_recorded_and_the_rest_still_land() {
    let generator = StubGenerator {
        fail_concepts: FxHashSet::from_iter(["c1".to_string(), "c3".to_string()]),
        ..StubGenerator::default()
    };
    let r = rig(5, generator, WorkerConfig::default()).await;
    let outcome = r.pool.run_job(&r.job).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::PartialFailure);
    assert_eq!(outcome.completed, 3);
    assert_eq!(outcome.failed, 2);
    let mut failed: Vec<&str> = outcome
        .failures
        .iter()
        .map(|f| f.concept_id.as_str())
        .collect();
    failed.sort_unstable();
    assert_eq!(failed, ["c1", "c3"]);
    // Nine rows from the three successful concepts, nothing partial
    // from the failed ones.
    assert_eq!(r.store.artifact_count(), 9);

    let task = r.store.load_task(&r.job.task_id).await.unwrap();
    assert_eq!(task.summary.concepts_failed, 2);
    assert_eq!(task.summary.failures.len(), 2);
}

#[tokio::test]
async fn failed_units_mark_their_slots_failed_in_the_snapshot() {
    let generator = StubGenerator {
        fail_concepts: FxHashSet::from_iter(["c1".to_string()]),
        ..StubGenerator::default()
    };
    let r = rig(3, generator, WorkerConfig::default()).await;
    let outcome = r.pool.run_job(&r.job).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::PartialFailure);

    let fw = r.store.load_framework("rm-test").await.unwrap();
    let failed = fw.concepts().find(|c| c.id == "c1").unwrap();
    for kind in ContentKind::ALL {
        let slot = failed.slot(kind);
        assert_eq!(slot.status, SlotStatus::Failed);
        assert_eq!(slot.attempts, 1);
        assert!(slot.artifact.is_none());
    }
    let ok = fw.concepts().find(|c| c.id == "c0").unwrap();
    for kind in ContentKind::ALL {
        assert!(ok.slot(kind).is_completed());
    }
}

#[tokio::test]
async fn duplicate_concept_ids_in_one_job_land_consistent_references() {
    let r = rig(2, StubGenerator::default(), WorkerConfig::default()).await;
    let mut job = r.job.clone();
    job.concept_ids.push("c0".into());

    let outcome = r.pool.run_job(&job).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.completed, 2);
    // The repeated id contributes nothing beyond the first landing.
    assert_eq!(r.store.artifact_count(), 6);

    // Every slot reference points at a row that was actually flushed.
    let fw = r.store.load_framework("rm-test").await.unwrap();
    for concept in fw.concepts() {
        for kind in ContentKind::ALL {
            let reference = concept.slot(kind).artifact.as_ref().unwrap();
            let row = r.store.artifact(&concept.id, kind).unwrap();
            assert_eq!(row.artifact_id, reference.artifact_id);
        }
    }
}

#[tokio::test]
async fn empty_job_finalizes_the_task_immediately() {
    let r = rig(0, StubGenerator::default(), WorkerConfig::default()).await;
    let outcome = r.pool.run_job(&r.job).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.flushes, 0);
    let view = r.store.status(&r.job.task_id).await.unwrap();
    assert_eq!(view.current_step, StepKind::Done);
    assert_eq!(view.status, TaskStatus::Completed);
}

#[tokio::test]
async fn unit_timeout_becomes_a_recorded_failure() {
    let generator = StubGenerator {
        delay: Some(Duration::from_millis(200)),
        ..StubGenerator::default()
    };
    let config = WorkerConfig {
        unit_timeout: Duration::from_millis(20),
        ..WorkerConfig::default()
    };
    let r = rig(1, generator, config).await;
    let outcome = r.pool.run_job(&r.job).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::PartialFailure);
    assert_eq!(outcome.failed, 1);
    assert!(outcome.failures[0].reason.contains("timed out"));
}

#[tokio::test]
async fn duplicate_delivery_converges_without_duplicating_content() {
    let r = rig(6, StubGenerator::default(), WorkerConfig::default()).await;
    r.queue.enqueue(r.job.clone()).await.unwrap();
    r.queue.enqueue(r.job.clone()).await.unwrap();

    let outcomes = r.pool.drain().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].status, TaskStatus::Completed);
    // Second delivery found a terminal task and did no work.
    assert_eq!(outcomes[1].flushes, 0);
    assert_eq!(r.store.artifact_count(), 18);
    assert_eq!(r.queue.in_flight_len(), 0);

    let view = r.store.status(&r.job.task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
}

#[tokio::test]
async fn already_populated_concepts_are_skipped_on_redelivery() {
    let r = rig(2, StubGenerator::default(), WorkerConfig::default()).await;

    // A previous partial run landed all of c0.
    let mut fw = r.store.load_framework("rm-test").await.unwrap();
    let c0 = fw.find_concept_mut("c0").unwrap();
    for kind in ContentKind::ALL {
        let slot = c0.slot_mut(kind);
        slot.begin_attempt();
        slot.complete(courseforge::model::ArtifactRef {
            artifact_id: format!("prior-{kind}"),
            version: 1,
        });
    }
    r.store.put_framework(fw);

    let outcome = r.pool.run_job(&r.job).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.completed, 2);
    // Only c1's three artifacts were generated.
    assert_eq!(r.generator_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concept_events_fan_out_per_content_kind() {
    let r = rig(2, StubGenerator::default(), WorkerConfig::default()).await;
    r.pool.run_job(&r.job).await.unwrap();
    r.events.stop().await;

    let events = r.sink.snapshot();
    let started = events
        .iter()
        .filter(|e| e.type_label() == "concept_started")
        .count();
    let completed = events
        .iter()
        .filter(|e| e.type_label() == "concept_completed")
        .count();
    assert_eq!(started, 6);
    assert_eq!(completed, 6);
    assert!(events.iter().any(|e| e.type_label() == "task_completed"));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Flush count is always `ceil(completed / batch_size)` when
        /// every unit succeeds, independent of concurrency interleaving.
        #[test]
        fn flush_count_matches_batch_arithmetic(
            n in 0usize..40,
            batch in 1usize..8,
            concurrency in 1usize..6,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let config = WorkerConfig {
                    concurrency,
                    batch_size: batch,
                    ..WorkerConfig::default()
                };
                let r = rig(n, StubGenerator::default(), config).await;
                let outcome = r.pool.run_job(&r.job).await.unwrap();
                prop_assert_eq!(outcome.completed, n);
                prop_assert_eq!(outcome.flushes, n.div_ceil(batch));
                prop_assert_eq!(r.store.artifact_count(), n * 3);
                let fw = r.store.load_framework("rm-test").await.unwrap();
                prop_assert!(fw.is_fully_populated());
                Ok(())
            })?;
        }
    }
}
