//! Compile service
//!
//! Handles one compilation request end to end:
//! - Starting the run deadline under the caller's cancellation token
//! - Creating and populating the workspace
//! - Executing the toolchain pipeline
//!
//! Whatever happens, exactly one terminal event reaches the sink.

use async_trait::async_trait;
use bitforge_core::domain::event::Event;
use bitforge_core::dto::compile::CompileRequest;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::config::RunnerConfig;
use crate::deadline::Deadline;
use crate::executor::{PipelineExecutor, PipelineRun};
use crate::observer::Observer;
use crate::process::ProcessRunner;
use crate::sink::{self, EventReceiver, EventSink};
use crate::toolchain::{ARTIFACT, Toolchain};
use crate::workspace::Workspace;

/// Service trait for compiling a source bundle
#[async_trait]
pub trait CompileService: Send + Sync {
    /// Runs a full compilation, streaming events into `sink`
    ///
    /// # Arguments
    /// * `request` - Sources and tuning parameters
    /// * `cancel` - Token tied to the lifetime of the caller
    /// * `sink` - Destination of every event of the run
    ///
    /// # Returns
    /// The terminal event, which has also been emitted to `sink`
    async fn compile(
        &self,
        request: CompileRequest,
        cancel: CancellationToken,
        sink: Arc<dyn EventSink>,
    ) -> Event;
}

/// Compile service backed by the real iCE40 toolchain
pub struct StandardCompileService {
    config: RunnerConfig,
    toolchain: Toolchain,
    executor: PipelineExecutor,
}

impl StandardCompileService {
    /// Creates a compile service from runner configuration
    pub fn new(config: RunnerConfig) -> Self {
        let toolchain = Toolchain::new(config.assets_dir.clone());
        let executor = PipelineExecutor::new(ProcessRunner::from_config(&config));
        Self {
            config,
            toolchain,
            executor,
        }
    }

    /// Reports run and command metrics to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.executor = self.executor.with_observer(observer);
        self
    }
}

#[async_trait]
impl CompileService for StandardCompileService {
    async fn compile(
        &self,
        request: CompileRequest,
        cancel: CancellationToken,
        sink: Arc<dyn EventSink>,
    ) -> Event {
        let guard = self.executor.begin();
        let deadline = Deadline::start(&cancel, self.config.compilation_timeout);

        info!(
            top_module = %request.top_module,
            sources = request.sources.len(),
            freq = request.freq(),
            seed = request.seed(),
            "Starting compilation"
        );

        let mut workspace = match Workspace::create(&self.config.workspace_base).await {
            Ok(workspace) => workspace,
            Err(e) => return self.executor.fail(guard, e, &sink).await,
        };

        let span = info_span!("compile", workspace = %workspace.id());
        async move {
            if let Err(e) = self.toolchain.populate(&mut workspace, &request).await {
                // Dropping the workspace removes it.
                return self.executor.fail(guard, e, &sink).await;
            }

            let commands = self.toolchain.commands(&request);
            let run = PipelineRun::new(workspace, deadline, commands, ARTIFACT);
            self.executor.execute(guard, run, &sink).await
        }
        .instrument(span)
        .await
    }
}

/// Starts a compilation on its own task and returns the event feed
///
/// The run keeps going until it reaches its terminal event; cancelling
/// `cancel` (for example when the caller disconnects) makes it stop early.
pub fn spawn_compile(
    service: Arc<dyn CompileService>,
    request: CompileRequest,
    cancel: CancellationToken,
    capacity: usize,
) -> EventReceiver {
    let (tx, rx) = sink::channel(capacity);
    let sink: Arc<dyn EventSink> = Arc::new(tx);

    tokio::spawn(async move {
        let terminal = service.compile(request, cancel, sink).await;
        info!(kind = terminal.kind(), "Compilation finished");
    });

    rx
}
