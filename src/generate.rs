//! Collaborator contract for artifact generation.
//!
//! The actual generation (LLM calls) lives outside the core; the worker
//! pool only sees this trait. Implementations must be safe to call more
//! than once per concept/content pair: the queue is at-least-once, so a
//! duplicate job replays generation and the store absorbs it with
//! idempotent upserts.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Concept, ContentKind};

/// A structured artifact plus its generation version counter.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedArtifact {
    pub body: Value,
    pub version: u32,
}

/// Errors an artifact generator may surface for one unit of work.
#[derive(Debug, Error, Diagnostic)]
pub enum GenerateError {
    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(courseforge::generate::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// The generated payload could not be structured.
    #[error(transparent)]
    #[diagnostic(code(courseforge::generate::serde))]
    Serde(#[from] serde_json::Error),

    /// Anything else the implementation wants to report.
    #[error("generation failed: {0}")]
    #[diagnostic(code(courseforge::generate::other))]
    Other(String),
}

/// Produces one content artifact for a concept.
///
/// One call per (concept, content kind); the worker pool drives all
/// three kinds for every concept in a job.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(
        &self,
        concept: &Concept,
        kind: ContentKind,
    ) -> Result<GeneratedArtifact, GenerateError>;
}
