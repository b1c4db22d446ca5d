//! Bitforge Runner
//!
//! Runs the FPGA toolchain for one compilation request and streams
//! everything it does as events.
//!
//! Architecture:
//! - Workspace: isolated per-run directory, removed on every exit path
//! - Deadline: one cancellation token per run (timeout or caller gone)
//! - Sink: ordered event channel with a single consumer
//! - Process runner: one command, two concurrent output readers
//! - Executor: ordered commands, stop on first failure, ship the artifact
//! - Service: request → workspace → pipeline, behind a trait

pub mod config;
pub mod deadline;
pub mod error;
pub mod executor;
pub mod observer;
pub mod process;
pub mod service;
pub mod sink;
pub mod toolchain;
pub mod workspace;

pub use config::RunnerConfig;
pub use deadline::Deadline;
pub use error::{PipelineError, Result};
pub use executor::{PipelineExecutor, PipelineRun, RunGuard};
pub use observer::{NoopObserver, Observer, Scope};
pub use process::ProcessRunner;
pub use service::{CompileService, StandardCompileService, spawn_compile};
pub use sink::{ChannelSink, EventReceiver, EventSink, SinkClosed};
pub use toolchain::Toolchain;
pub use workspace::Workspace;
