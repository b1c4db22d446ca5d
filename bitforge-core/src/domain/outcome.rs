//! Command outcome types

use serde::{Deserialize, Serialize};

/// Resolved result of running one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Process exited with status zero
    Completed,
    /// Process could not be launched or exited non-zero
    Failed(String),
    /// The run deadline fired while the process was running
    TimedOut(String),
    /// The run was cancelled from outside (the caller went away)
    Cancelled,
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    /// Label used for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed(_) => "failed",
            Outcome::TimedOut(_) => "timed_out",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Final status of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }
}
