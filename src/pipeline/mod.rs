//! The foreground pipeline: handlers, assembly, routing.

pub mod engine;
pub mod handler;

pub use engine::{CompileError, EngineError, Pipeline, PipelineBuilder, PipelineEngine, RunOutcome};
pub use handler::{ErrorClass, StepContext, StepDelta, StepError, StepHandler};
