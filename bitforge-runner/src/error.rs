//! Error types for pipeline runs
//!
//! Every variant is terminal for the run. Its `Display` text is exactly the
//! message the caller receives in the closing `error` event.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that end a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Workspace could not be created, written or read
    #[error("{message}")]
    Resource {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Program could not be started or its output could not be attached
    #[error("{0}")]
    ProcessLaunch(String),

    /// Program exited with a non-zero status
    #[error("{command} failed: {detail}")]
    ProcessFailure { command: String, detail: String },

    /// The run deadline fired
    #[error("Compilation timeout: operation exceeded {}", format_timeout(.0))]
    TimedOut(Duration),

    /// The caller went away before the run finished
    #[error("Compilation cancelled")]
    Cancelled,

    /// Every command succeeded but the artifact could not be read
    #[error("Failed to read bitstream")]
    ArtifactMissing(#[source] Box<PipelineError>),
}

impl PipelineError {
    /// Resource error wrapping an I/O failure
    pub fn resource(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Resource {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Resource error with no underlying I/O error (e.g. a rejected path)
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            source: None,
        }
    }
}

/// Renders whole seconds as `120s`, anything finer as `250ms`
fn format_timeout(timeout: &Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}
