//! Error taxonomy for a build.
//!
//! Steps record the first failure into the build context as a [`BuildError`]
//! and halt the pipeline. Cleanup paths never produce these; they log and move
//! on so one broken teardown cannot mask the original failure.

use std::time::Duration;

use thiserror::Error;

/// Errors that can terminate a build.
#[derive(Error, Debug)]
pub enum BuildError {
    // ------------------------------------------------------------------
    // External programs
    // ------------------------------------------------------------------
    /// An invoked program exited non-zero. `stderr` is the trimmed capture.
    #[error("{program} failed: {stderr}")]
    ExternalCommand { program: String, stderr: String },

    /// An invoked program could not be started at all.
    #[error("failed to start {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // ------------------------------------------------------------------
    // Transient kernel resources
    // ------------------------------------------------------------------
    /// A destroy operation kept reporting busy. Only ever logged.
    #[error("{resource} still busy after {attempts} attempts")]
    ResourceBusy { resource: String, attempts: u32 },

    // ------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------
    /// A bounded wait exceeded its deadline.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// The external cancellation signal fired.
    #[error("build was cancelled")]
    Cancelled,

    /// A step halted the pipeline without recording a more specific error.
    #[error("build was halted")]
    Halted,

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    /// Aggregated validation failures, one message per problem.
    #[error("invalid configuration:\n  * {}", .0.join("\n  * "))]
    Configuration(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BuildError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// `true` for terminal states the caller should report as cancellation
    /// rather than failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<anyhow::Error> for BuildError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BuildError>() {
            Ok(build) => build,
            Err(other) => Self::Other(format!("{other:#}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
