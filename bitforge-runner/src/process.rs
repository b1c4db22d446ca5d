//! Process runner
//!
//! Runs one external command inside a workspace and streams its output.
//!
//! Each launched process gets two reader tasks, one per output stream. Each
//! reader owns its own buffer and forwards every non-empty read as an event,
//! so a process that floods one stream never delays the other, and neither
//! reader delays exit detection. The runner waits for exit and for the
//! run deadline at the same time; whichever comes first resolves the outcome.

use bitforge_core::domain::command::CommandSpec;
use bitforge_core::domain::event::{Event, Stream};
use bitforge_core::domain::outcome::Outcome;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::deadline::Deadline;
use crate::error::PipelineError;
use crate::observer::{NoopObserver, Observer, Scope};
use crate::sink::EventSink;

/// Launches commands and turns their lifetime into an [`Outcome`]
#[derive(Clone)]
pub struct ProcessRunner {
    read_chunk_size: usize,
    drain_grace: Duration,
    observer: Arc<dyn Observer>,
}

impl ProcessRunner {
    pub fn new(read_chunk_size: usize, drain_grace: Duration) -> Self {
        Self {
            read_chunk_size: read_chunk_size.max(1),
            drain_grace,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.read_chunk_size, config.drain_grace)
    }

    /// Reports per-command durations to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs `command` with `workdir` as its working directory
    ///
    /// Emits the command announcement first, then output chunks while the
    /// process runs. Never emits a terminal event; that is left to the caller
    /// so a run has exactly one.
    pub async fn run(
        &self,
        deadline: &Deadline,
        workdir: &Path,
        command: &CommandSpec,
        sink: &Arc<dyn EventSink>,
    ) -> Outcome {
        let started = Instant::now();
        let outcome = self.run_inner(deadline, workdir, command, sink).await;
        self.observer
            .record_duration(Scope::Command(command.program()), started.elapsed());

        info!(
            command = %command.program(),
            outcome = outcome.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        outcome
    }

    async fn run_inner(
        &self,
        deadline: &Deadline,
        workdir: &Path,
        command: &CommandSpec,
        sink: &Arc<dyn EventSink>,
    ) -> Outcome {
        if deadline.is_cancelled() {
            return interrupted(deadline);
        }

        tokio::select! {
            biased;
            _ = deadline.cancelled() => return interrupted(deadline),
            sent = sink.emit(Event::command(command)) => {
                if sent.is_err() {
                    debug!(command = %command.program(), "No consumer for command announcement");
                }
            }
        }

        info!(command = %command, workdir = %workdir.display(), "Starting command");

        let mut child = match Command::new(command.program())
            .args(command.args())
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command.program(), error = %e, "Failed to start command");
                return Outcome::Failed(
                    PipelineError::ProcessLaunch(format!(
                        "Failed to start {}: {}",
                        command.program(),
                        e
                    ))
                    .to_string(),
                );
            }
        };

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                let stream = if stdout.is_none() { "stdout" } else { "stderr" };
                if let Err(e) = child.kill().await {
                    warn!(command = %command.program(), error = %e, "Failed to kill command");
                }
                return Outcome::Failed(
                    PipelineError::ProcessLaunch(format!(
                        "Failed to create {} pipe for {}",
                        stream,
                        command.program()
                    ))
                    .to_string(),
                );
            }
        };

        let exited = CancellationToken::new();
        let readers = [
            self.spawn_reader(stdout, Stream::Stdout, sink, deadline.token(), &exited),
            self.spawn_reader(stderr, Stream::Stderr, sink, deadline.token(), &exited),
        ];

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => Outcome::Completed,
                Ok(status) => {
                    debug!(command = %command.program(), code = ?status.code(), "Command exited non-zero");
                    Outcome::Failed(
                        PipelineError::ProcessFailure {
                            command: command.program().to_string(),
                            detail: status.to_string(),
                        }
                        .to_string(),
                    )
                }
                Err(e) => Outcome::Failed(
                    PipelineError::ProcessFailure {
                        command: command.program().to_string(),
                        detail: e.to_string(),
                    }
                    .to_string(),
                ),
            },
            _ = deadline.cancelled() => {
                info!(command = %command.program(), "Run cancelled; killing command");
                if let Err(e) = child.kill().await {
                    warn!(command = %command.program(), error = %e, "Failed to kill command");
                }
                interrupted(deadline)
            }
        };

        exited.cancel();
        self.drain(readers, command).await;

        // Output cut short by the token means the command did not fully complete.
        if outcome.is_completed() && deadline.is_cancelled() {
            return interrupted(deadline);
        }
        outcome
    }

    fn spawn_reader<R>(
        &self,
        reader: R,
        stream: Stream,
        sink: &Arc<dyn EventSink>,
        token: &CancellationToken,
        exited: &CancellationToken,
    ) -> JoinHandle<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(read_stream(
            reader,
            stream,
            Arc::clone(sink),
            ReadLimits {
                token: token.clone(),
                exited: exited.clone(),
                idle_grace: self.drain_grace,
                chunk_size: self.read_chunk_size,
            },
        ))
    }

    /// Waits for both readers to finish forwarding output
    ///
    /// Readers end on their own: at end of stream, on cancellation, or once
    /// a read has waited longer than the drain grace after the command exited.
    async fn drain(&self, readers: [JoinHandle<u64>; 2], command: &CommandSpec) {
        let [stdout, stderr] = readers;
        let (stdout, stderr) = tokio::join!(stdout, stderr);
        debug!(
            command = %command.program(),
            stdout_bytes = stdout.unwrap_or_default(),
            stderr_bytes = stderr.unwrap_or_default(),
            "Output drained"
        );
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

/// Outcome for a command interrupted by the run's token
fn interrupted(deadline: &Deadline) -> Outcome {
    if deadline.timed_out() {
        Outcome::TimedOut(PipelineError::TimedOut(deadline.timeout()).to_string())
    } else {
        Outcome::Cancelled
    }
}

/// When a reader gives up on its stream
struct ReadLimits {
    /// Run token; stops both reading and emitting
    token: CancellationToken,
    /// Fired once the command has exited
    exited: CancellationToken,
    /// How long a read may wait for data after exit
    idle_grace: Duration,
    chunk_size: usize,
}

impl ReadLimits {
    /// Resolves when a pending read has outlived the command by the grace period
    ///
    /// A grandchild that inherited the pipe can keep it open long after the
    /// command itself has gone. Time spent waiting on the consumer never counts.
    async fn idle_after_exit(&self) {
        self.exited.cancelled().await;
        tokio::time::sleep(self.idle_grace).await;
    }
}

/// Forwards one output stream to the sink, one event per non-empty read
///
/// Returns the number of bytes read. Stops at end of stream, on
/// cancellation, or when the pipe stays silent past the grace period after
/// exit. Emitting waits for the consumer as long as the run is alive.
/// If the consumer disappears the stream is still drained so the process
/// never blocks on a full pipe.
async fn read_stream<R>(
    mut reader: R,
    stream: Stream,
    sink: Arc<dyn EventSink>,
    limits: ReadLimits,
) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; limits.chunk_size];
    let mut total = 0u64;
    let mut consumer_gone = false;

    loop {
        let n = tokio::select! {
            biased;
            _ = limits.token.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(stream = stream.as_str(), error = %e, "Output read failed");
                    break;
                }
            },
            _ = limits.idle_after_exit() => {
                warn!(
                    stream = stream.as_str(),
                    grace = ?limits.idle_grace,
                    "Output still open after exit; abandoning reader"
                );
                break;
            }
        };
        total += n as u64;

        if consumer_gone {
            continue;
        }

        tokio::select! {
            biased;
            _ = limits.token.cancelled() => break,
            sent = sink.emit(Event::output(stream, &buf[..n])) => {
                if sent.is_err() {
                    debug!(stream = stream.as_str(), "Consumer gone; discarding output");
                    consumer_gone = true;
                }
            }
        }
    }

    total
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sink::{self, EventReceiver};

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    fn sink_pair() -> (Arc<dyn EventSink>, EventReceiver) {
        let (tx, rx) = sink::channel(64);
        (Arc::new(tx), rx)
    }

    fn joined(events: &[Event], stream: Stream) -> String {
        events
            .iter()
            .filter_map(|event| match (event, stream) {
                (Event::Stdout { data }, Stream::Stdout) => Some(data.as_str()),
                (Event::Stderr { data }, Stream::Stderr) => Some(data.as_str()),
                _ => None,
            })
            .collect()
    }

    async fn run(script: &str, timeout: Duration) -> (Outcome, Vec<Event>) {
        let dir = tempfile::tempdir().unwrap();
        let deadline = Deadline::start(&CancellationToken::new(), timeout);
        let (sink, rx) = sink_pair();

        let outcome = ProcessRunner::default()
            .run(&deadline, dir.path(), &sh(script), &sink)
            .await;
        drop(sink);

        (outcome, rx.collect().await)
    }

    #[tokio::test]
    async fn test_successful_command_streams_stdout() {
        let (outcome, events) = run("echo ok", Duration::from_secs(10)).await;

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(events[0].kind(), "command");
        assert_eq!(joined(&events, Stream::Stdout), "ok\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let (outcome, events) = run("echo bad >&2; exit 3", Duration::from_secs(10)).await;

        match outcome {
            Outcome::Failed(message) => {
                assert!(message.starts_with("sh failed: "), "{message}");
                assert!(message.contains('3'));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(joined(&events, Stream::Stderr), "bad\n");
        assert!(events.iter().all(|event| !event.is_terminal()));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let deadline = Deadline::start(&CancellationToken::new(), Duration::from_secs(10));
        let (sink, rx) = sink_pair();
        let command = CommandSpec::new("bitforge-no-such-program", ["--version"]);

        let outcome = ProcessRunner::default()
            .run(&deadline, dir.path(), &command, &sink)
            .await;
        drop(sink);

        match outcome {
            Outcome::Failed(message) => {
                assert!(message.starts_with("Failed to start bitforge-no-such-program"))
            }
            other => panic!("expected launch failure, got {other:?}"),
        }
        assert_eq!(rx.collect().await.len(), 1);
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let deadline = Deadline::start(&CancellationToken::new(), Duration::from_secs(10));
        let (sink, rx) = sink_pair();

        let outcome = ProcessRunner::default()
            .run(&deadline, dir.path(), &sh("cat marker.txt"), &sink)
            .await;
        drop(sink);

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(joined(&rx.collect().await, Stream::Stdout), "here");
    }

    #[tokio::test]
    async fn test_stderr_only_process_does_not_stall() {
        let (outcome, events) = run(
            "i=0; while [ $i -lt 200 ]; do echo line-$i >&2; i=$((i+1)); done",
            Duration::from_secs(10),
        )
        .await;

        assert_eq!(outcome, Outcome::Completed);
        assert!(joined(&events, Stream::Stdout).is_empty());
        let stderr = joined(&events, Stream::Stderr);
        assert!(stderr.starts_with("line-0\n"));
        assert!(stderr.ends_with("line-199\n"));
    }

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let deadline = Deadline::start(&CancellationToken::new(), Duration::from_secs(10));
        let (sink, rx) = sink_pair();
        let runner = ProcessRunner::new(16, Duration::from_secs(1));

        let outcome = runner
            .run(&deadline, dir.path(), &sh("printf '%0100d' 0"), &sink)
            .await;
        drop(sink);

        assert_eq!(outcome, Outcome::Completed);
        let events = rx.collect().await;
        let chunks: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                Event::Stdout { data } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        assert!(chunks.iter().all(|chunk| !chunk.is_empty() && chunk.len() <= 16));
        assert_eq!(chunks.concat(), "0".repeat(100));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_command() {
        let started = Instant::now();
        let (outcome, events) = run("echo start; sleep 30", Duration::from_millis(300)).await;

        assert_eq!(
            outcome,
            Outcome::TimedOut("Compilation timeout: operation exceeded 300ms".to_string())
        );
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(events[0].kind(), "command");
    }

    #[tokio::test]
    async fn test_caller_cancellation_is_not_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let request = CancellationToken::new();
        let deadline = Deadline::start(&request, Duration::from_secs(60));
        let (sink, _rx) = sink_pair();

        let cancel = request.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let outcome = ProcessRunner::default()
            .run(&deadline, dir.path(), &sh("sleep 30"), &sink)
            .await;

        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn test_grandchild_holding_pipe_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let deadline = Deadline::start(&CancellationToken::new(), Duration::from_secs(30));
        let (sink, _rx) = sink_pair();
        let runner = ProcessRunner::new(1024, Duration::from_millis(200));
        let started = Instant::now();

        let outcome = runner
            .run(&deadline, dir.path(), &sh("sleep 20 & echo parent-done"), &sink)
            .await;

        assert_eq!(outcome, Outcome::Completed);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_slow_consumer_receives_all_output() {
        let dir = tempfile::tempdir().unwrap();
        let deadline = Deadline::start(&CancellationToken::new(), Duration::from_secs(30));
        let (tx, mut rx) = sink::channel(4);
        let sink: Arc<dyn EventSink> = Arc::new(tx);
        let runner = ProcessRunner::new(16, Duration::from_millis(300));

        let consumer = tokio::spawn(async move {
            let mut received = String::new();
            while let Some(event) = rx.recv().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if let Event::Stdout { data } = event {
                    received.push_str(&data);
                }
            }
            received
        });

        let outcome = runner
            .run(&deadline, dir.path(), &sh("printf '%01600d' 0"), &sink)
            .await;
        drop(sink);

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(consumer.await.unwrap(), "0".repeat(1600));
    }

    #[tokio::test]
    async fn test_deadline_during_backpressure_is_not_completed() {
        let dir = tempfile::tempdir().unwrap();
        let deadline = Deadline::start(&CancellationToken::new(), Duration::from_millis(200));
        let (tx, _rx) = sink::channel(1);
        let sink: Arc<dyn EventSink> = Arc::new(tx);
        let runner = ProcessRunner::new(16, Duration::from_millis(50));

        // Nobody reads: the first chunk fills the channel and the rest waits.
        let outcome = runner
            .run(&deadline, dir.path(), &sh("printf '%0400d' 0"), &sink)
            .await;

        assert_eq!(
            outcome,
            Outcome::TimedOut("Compilation timeout: operation exceeded 200ms".to_string())
        );
    }

    #[tokio::test]
    async fn test_dropped_consumer_does_not_fail_command() {
        let dir = tempfile::tempdir().unwrap();
        let deadline = Deadline::start(&CancellationToken::new(), Duration::from_secs(10));
        let (sink, rx) = sink_pair();
        drop(rx);

        let outcome = ProcessRunner::default()
            .run(&deadline, dir.path(), &sh("seq 1 5000"), &sink)
            .await;

        assert_eq!(outcome, Outcome::Completed);
    }
}
