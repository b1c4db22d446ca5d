//! Run observation
//!
//! The executor reports durations and outcomes through an injected
//! [`Observer`] instead of process-wide metric registries. The server crate
//! provides a Prometheus-backed implementation.

use bitforge_core::domain::outcome::RunStatus;
use std::time::Duration;

/// What a recorded duration measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    /// A whole pipeline run
    Run,
    /// One command, identified by its program name
    Command(&'a str),
}

/// Capability for recording run metrics
pub trait Observer: Send + Sync {
    /// A run has started
    fn run_started(&self) {}

    /// Records how long a run or a command took
    fn record_duration(&self, scope: Scope<'_>, elapsed: Duration);

    /// Records the final status of a run; called exactly once per run
    fn record_outcome(&self, status: RunStatus);
}

/// Observer that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn record_duration(&self, _scope: Scope<'_>, _elapsed: Duration) {}

    fn record_outcome(&self, _status: RunStatus) {}
}

#[cfg(test)]
pub(crate) use recording::{Observation, RecordingObserver};
