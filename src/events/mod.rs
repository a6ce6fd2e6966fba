//! Best-effort notification channel.
//!
//! Lifecycle and fine-grained progress events fan out from a bounded
//! flume channel to pluggable [`EventSink`]s via a background listener
//! task. Publishing is fire-and-forget with a bounded timeout: a full
//! channel, a dead listener, or a failing sink is logged and swallowed,
//! never surfaced to the pipeline or a worker job.

pub mod channel;
pub mod event;
pub mod sink;

pub use channel::{EventChannel, EventChannelConfig};
pub use event::PipelineEvent;
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
