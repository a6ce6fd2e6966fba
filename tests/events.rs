use std::time::{Duration, Instant};

use courseforge::events::{ChannelSink, EventChannel, EventChannelConfig, MemorySink, PipelineEvent};
use courseforge::model::{ContentKind, TaskStatus};
use courseforge::steps::{BranchSource, StepKind};

#[tokio::test]
async fn listener_fans_out_to_every_sink() {
    let first = MemorySink::new();
    let second = MemorySink::new();
    let channel = EventChannel::with_sinks(
        EventChannelConfig::default(),
        vec![Box::new(first.clone()), Box::new(second.clone())],
    );
    channel.listen();

    channel.publish(PipelineEvent::step_started("t-1", StepKind::Intent));
    channel.publish(PipelineEvent::task_completed("t-1", TaskStatus::Completed));
    channel.stop().await;

    for sink in [&first, &second] {
        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].type_label(), "step_started");
        assert_eq!(events[1].type_label(), "task_completed");
    }
}

#[tokio::test]
async fn publish_without_listener_times_out_instead_of_blocking() {
    let channel = EventChannel::with_sinks(
        EventChannelConfig::new(1, Duration::from_millis(20)),
        vec![],
    );
    // No listen(): the first publish fills the channel, the rest hit
    // the timeout path.
    let started = Instant::now();
    for _ in 0..5 {
        channel.publish(PipelineEvent::step_started("t-1", StepKind::Design));
    }
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(500), "blocked for {elapsed:?}");
}

#[tokio::test]
async fn channel_sink_forwards_to_async_consumers() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let channel = EventChannel::with_sink(EventChannelConfig::default(), ChannelSink::new(tx));
    channel.listen();

    channel.publish(PipelineEvent::concept_completed(
        "t-1",
        "c0",
        ContentKind::Quiz,
    ));
    channel.stop().await;

    let event = rx.recv().await.expect("forwarded event");
    assert_eq!(event.type_label(), "concept_completed");
    assert_eq!(event.task_id(), "t-1");
}

#[tokio::test]
async fn dropped_consumer_does_not_poison_later_publishes() {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let memory = MemorySink::new();
    let channel = EventChannel::with_sinks(
        EventChannelConfig::default(),
        vec![Box::new(ChannelSink::new(tx)), Box::new(memory.clone())],
    );
    channel.listen();
    drop(rx);

    channel.publish(PipelineEvent::step_completed(
        "t-1",
        StepKind::Edit(BranchSource::Review),
    ));
    channel.stop().await;

    // The dead channel sink errored; the memory sink still got it.
    let events = memory.snapshot();
    assert_eq!(events.len(), 1);
}

#[test]
fn json_shape_keeps_the_branch_tag_in_the_step_field() {
    let event = PipelineEvent::step_failed(
        "t-9",
        StepKind::EditPlan(BranchSource::Validation),
        "planner unavailable",
    );
    let value = event.to_json_value();
    assert_eq!(value["type"], "step_failed");
    assert_eq!(value["task_id"], "t-9");
    assert_eq!(value["step"], "EditPlan:validation");
    assert!(value["timestamp"].is_string());
}
