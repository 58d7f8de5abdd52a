//! Error taxonomy shared by the runner and the in-image checks.
//!
//! Variants map one-to-one onto how far a run got before failing:
//! configuration and materialization errors happen before any cluster
//! state exists, launch errors abort the batch, and everything after
//! that (query, timeout, harvest, cleanup) degrades into a partial report.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ScorecardError {
    /// Bad selector, missing bundle path, unknown output format.
    #[error("config error: {0}")]
    Config(String),

    /// Test-definition document could not be parsed.
    #[error("failed to parse test configuration: {0}")]
    Parse(String),

    /// Bundle content could not be read or published.
    #[error("failed to materialize bundle: {0}")]
    Materialize(String),

    /// Platform rejected an execution unit.
    #[error("failed to launch test '{test}': {reason}")]
    Launch { test: String, reason: String },

    /// Status queries kept failing until the deadline.
    #[error("failed to query execution units: {0}")]
    Query(String),

    /// Some units were still running when the deadline passed.
    #[error("wait time of {}s exceeded with {} unit(s) still running: {}", .waited.as_secs(), .pending.len(), .pending.join(", "))]
    Timeout {
        waited: Duration,
        pending: Vec<String>,
    },

    /// Wait was cancelled before all units finished.
    #[error("wait cancelled with {} unit(s) still running", .pending.len())]
    Cancelled { pending: Vec<String> },

    /// Output of a single unit could not be retrieved or parsed.
    #[error("failed to harvest result from '{unit}': {reason}")]
    Harvest { unit: String, reason: String },

    #[error("cleanup of '{resource}' failed: {reason}")]
    Cleanup { resource: String, reason: String },

    #[error("failed to serialize report: {0}")]
    Serialization(String),
}

impl ScorecardError {
    /// Run-level warnings still come with a usable (partial) report.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ScorecardError::Query(_)
                | ScorecardError::Timeout { .. }
                | ScorecardError::Cancelled { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScorecardError>;
