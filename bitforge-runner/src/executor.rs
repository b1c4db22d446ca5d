//! Pipeline executor
//!
//! Drives an ordered list of commands through the [`ProcessRunner`], one at a
//! time, inside a single workspace and under a single deadline. The first
//! command that does not complete ends the run. When every command completes
//! the artifact is read back and shipped as the success event.
//!
//! Every run ends with exactly one terminal event, emitted here, and the
//! workspace is destroyed before the terminal event is returned.

use bitforge_core::domain::command::CommandSpec;
use bitforge_core::domain::event::Event;
use bitforge_core::domain::outcome::{Outcome, RunStatus};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::deadline::Deadline;
use crate::error::PipelineError;
use crate::observer::{NoopObserver, Observer, Scope};
use crate::process::ProcessRunner;
use crate::sink::EventSink;
use crate::workspace::Workspace;

/// Everything one pipeline run needs
#[derive(Debug)]
pub struct PipelineRun {
    pub commands: Vec<CommandSpec>,
    pub workspace: Workspace,
    pub deadline: Deadline,
    /// Workspace-relative name of the file shipped on success
    pub artifact: String,
}

impl PipelineRun {
    pub fn new(
        workspace: Workspace,
        deadline: Deadline,
        commands: Vec<CommandSpec>,
        artifact: impl Into<String>,
    ) -> Self {
        Self {
            commands,
            workspace,
            deadline,
            artifact: artifact.into(),
        }
    }
}

/// Bookkeeping for one run, from its first byte to its terminal event
///
/// Handed out by [`PipelineExecutor::begin`] and consumed by
/// [`PipelineExecutor::execute`] or [`PipelineExecutor::fail`]. A guard that is
/// dropped unfinished still records the run as an error.
pub struct RunGuard {
    observer: Arc<dyn Observer>,
    started: Instant,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self, status: RunStatus) {
        self.record(status);
    }

    fn record(&mut self, status: RunStatus) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.observer
            .record_duration(Scope::Run, self.started.elapsed());
        self.observer.record_outcome(status);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.record(RunStatus::Error);
    }
}

/// Runs command pipelines and reports their single terminal event
#[derive(Clone)]
pub struct PipelineExecutor {
    runner: ProcessRunner,
    observer: Arc<dyn Observer>,
}

impl PipelineExecutor {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Reports run and command metrics to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.runner = self.runner.with_observer(Arc::clone(&observer));
        self.observer = observer;
        self
    }

    /// Marks the start of a run
    pub fn begin(&self) -> RunGuard {
        self.observer.run_started();
        RunGuard {
            observer: Arc::clone(&self.observer),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Runs every command in order and returns the terminal event
    ///
    /// The terminal event has already been pushed to `sink` when this returns.
    pub async fn execute(
        &self,
        guard: RunGuard,
        run: PipelineRun,
        sink: &Arc<dyn EventSink>,
    ) -> Event {
        let PipelineRun {
            commands,
            workspace,
            deadline,
            artifact,
        } = run;

        info!(
            workspace = %workspace.id(),
            commands = commands.len(),
            files = ?workspace.files().collect::<Vec<_>>(),
            "Starting pipeline"
        );

        let result = self
            .run_commands(&commands, &workspace, &deadline, &artifact, sink)
            .await;

        // Tear down before the terminal event leaves, so a caller that saw the
        // terminal event can rely on the workspace being gone.
        workspace.destroy().await;
        drop(deadline);

        match result {
            Ok(bitstream) => {
                info!(bytes = bitstream.len(), "Pipeline succeeded");
                let terminal = Event::success(&bitstream);
                self.emit_terminal(&terminal, sink).await;
                guard.finish(RunStatus::Success);
                terminal
            }
            Err(message) => self.finish_with_error(guard, message, sink).await,
        }
    }

    /// Ends a run that failed before its pipeline could start
    pub async fn fail(
        &self,
        guard: RunGuard,
        error: PipelineError,
        sink: &Arc<dyn EventSink>,
    ) -> Event {
        error!(error = %error, "Run failed during setup");
        self.finish_with_error(guard, error.to_string(), sink).await
    }

    async fn run_commands(
        &self,
        commands: &[CommandSpec],
        workspace: &Workspace,
        deadline: &Deadline,
        artifact: &str,
        sink: &Arc<dyn EventSink>,
    ) -> Result<Vec<u8>, String> {
        for (idx, command) in commands.iter().enumerate() {
            debug!(
                "Running command {}/{}: {}",
                idx + 1,
                commands.len(),
                command.program()
            );

            let outcome = self
                .runner
                .run(deadline, workspace.root(), command, sink)
                .await;

            match outcome {
                Outcome::Completed => {}
                Outcome::Failed(message) | Outcome::TimedOut(message) => {
                    warn!(command = %command.program(), "Pipeline stopped: {}", message);
                    return Err(message);
                }
                Outcome::Cancelled => {
                    info!(command = %command.program(), "Pipeline cancelled by caller");
                    return Err(PipelineError::Cancelled.to_string());
                }
            }
        }

        workspace.read_file(artifact).await.map_err(|e| {
            warn!(artifact = %artifact, error = %e, "Artifact missing after successful pipeline");
            PipelineError::ArtifactMissing(Box::new(e)).to_string()
        })
    }

    async fn finish_with_error(
        &self,
        guard: RunGuard,
        message: String,
        sink: &Arc<dyn EventSink>,
    ) -> Event {
        let terminal = Event::error(message);
        self.emit_terminal(&terminal, sink).await;
        guard.finish(RunStatus::Error);
        terminal
    }

    async fn emit_terminal(&self, terminal: &Event, sink: &Arc<dyn EventSink>) {
        if sink.emit(terminal.clone()).await.is_err() {
            debug!(kind = terminal.kind(), "Terminal event dropped; consumer gone");
        }
    }
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new(ProcessRunner::default())
    }
}
