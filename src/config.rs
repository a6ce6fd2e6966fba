//! Pipeline configuration.
//!
//! Defaults are sensible for local runs; every knob has a `with_`
//! builder, and the SQLite database location resolves from the
//! environment (a `.env` file is honored) the same way across binaries
//! and tests.

use std::time::Duration;

use crate::events::EventChannelConfig;
use crate::worker::WorkerConfig;

/// Tunable parameters for the foreground pipeline and background phase.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Maximum automatic validation-loop passes before escalating to
    /// review with the critical issues attached.
    pub validation_retry_cap: u32,
    /// Overall score a validation pass must reach to proceed.
    pub validation_threshold: f64,
    pub worker: WorkerConfig,
    pub events: EventChannelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validation_retry_cap: 3,
            validation_threshold: 0.8,
            worker: WorkerConfig::default(),
            events: EventChannelConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_validation_retry_cap(mut self, cap: u32) -> Self {
        self.validation_retry_cap = cap;
        self
    }

    #[must_use]
    pub fn with_validation_threshold(mut self, threshold: f64) -> Self {
        self.validation_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventChannelConfig) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.worker.unit_timeout = timeout;
        self
    }
}

/// Resolve the SQLite database file name from the environment.
///
/// Looks for `COURSEFORGE_DB` (a `.env` file is consulted first), and
/// falls back to `courseforge.db` in the working directory.
pub fn resolve_db_name() -> String {
    let _ = dotenvy::dotenv();
    std::env::var("COURSEFORGE_DB").unwrap_or_else(|_| "courseforge.db".to_string())
}
