//! # Courseforge: Checkpointed Curriculum-Generation Pipeline
//!
//! Courseforge orchestrates the multi-stage generation of a learning
//! curriculum: a fixed, checkpointed step graph refines a curriculum
//! framework through two self-correcting loops, then a background
//! worker pool populates every concept with content under batched,
//! incremental persistence.
//!
//! ## Core Concepts
//!
//! - **Steps**: A closed [`steps::StepKind`] topology; the two branch
//!   loops tag their steps with a [`steps::BranchSource`] so revisits
//!   are never ambiguous.
//! - **Handlers**: Pure async units of work ([`pipeline::StepHandler`])
//!   that map the working state to a [`pipeline::StepDelta`].
//! - **Coordinator**: Brackets every handler with one-transaction
//!   writes and post-commit notifications.
//! - **Store**: The [`store::TaskStore`] seam; in-memory and SQLite
//!   backends ship, and the terminal-status invariants live there.
//! - **Worker pool**: Concurrent content generation with a shared
//!   completion buffer that flushes in batches.
//! - **Events**: Best-effort fan-out of [`events::PipelineEvent`]s;
//!   a slow consumer can never stall the pipeline.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use courseforge::config::PipelineConfig;
//! use courseforge::events::EventChannel;
//! use courseforge::pipeline::{PipelineBuilder, PipelineEngine, RunOutcome};
//! use courseforge::store::InMemoryTaskStore;
//! use courseforge::worker::InMemoryJobQueue;
//!
//! # async fn demo(builder: PipelineBuilder) -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = builder.compile()?;
//! let store = Arc::new(InMemoryTaskStore::new());
//! let queue = Arc::new(InMemoryJobQueue::new());
//! let engine = PipelineEngine::new(
//!     pipeline,
//!     store,
//!     queue,
//!     EventChannel::default(),
//!     PipelineConfig::default(),
//! );
//!
//! let task = engine.create_task("alice").await?;
//! match engine.run_task(&task.id).await? {
//!     RunOutcome::Dispatched(job) => {
//!         // hand `job` to a WorkerPool for the background phase
//!     }
//!     RunOutcome::AlreadyTerminal(status) => println!("done: {status}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Resuming after an interruption is the same call: `run_task` starts
//! from the latest checkpoint and never re-executes a completed step.

pub mod config;
pub mod coordinator;
pub mod events;
pub mod generate;
pub mod model;
pub mod pipeline;
pub mod state;
pub mod steps;
pub mod store;
pub mod telemetry;
pub mod worker;
