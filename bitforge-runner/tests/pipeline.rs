//! End-to-end pipeline behaviour with real processes.

#![cfg(unix)]

use bitforge_core::domain::command::CommandSpec;
use bitforge_core::domain::event::Event;
use bitforge_runner::{Deadline, EventSink, PipelineExecutor, PipelineRun, Workspace, sink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", ["-c", script])
}

struct Finished {
    terminal: Event,
    events: Vec<Event>,
    root: PathBuf,
}

async fn run_pipeline(base: &Path, commands: Vec<CommandSpec>, timeout: Duration) -> Finished {
    let workspace = Workspace::create(base).await.unwrap();
    let root = workspace.root().to_path_buf();
    let deadline = Deadline::start(&CancellationToken::new(), timeout);
    let (tx, rx) = sink::channel(64);
    let sink: Arc<dyn EventSink> = Arc::new(tx);

    let executor = PipelineExecutor::default();
    let terminal = executor
        .execute(
            executor.begin(),
            PipelineRun::new(workspace, deadline, commands, "output.bin"),
            &sink,
        )
        .await;
    drop(sink);

    Finished {
        terminal,
        events: rx.collect().await,
        root,
    }
}

/// Splits the feed into per-command segments, each starting with its announcement
fn segments(events: &[Event]) -> Vec<&[Event]> {
    let starts: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, Event::Command { .. }))
        .map(|(i, _)| i)
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(events.len());
            &events[start..end]
        })
        .collect()
}

fn stream_text(events: &[Event], stderr: bool) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Stdout { data } if !stderr => Some(data.as_str()),
            Event::Stderr { data } if stderr => Some(data.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_failure_scenario_event_sequence() {
    let base = tempfile::tempdir().unwrap();

    let run = run_pipeline(
        base.path(),
        vec![
            CommandSpec::new("sh", ["-c", "printf ok"]),
            CommandSpec::new("sh", ["-c", "printf bad >&2; exit 1"]),
            sh("printf unreachable > output.bin"),
        ],
        Duration::from_secs(10),
    )
    .await;

    let (terminal, body) = run.events.split_last().unwrap();
    assert_eq!(terminal, &run.terminal);
    let Event::Error { message } = terminal else {
        panic!("expected error, got {terminal:?}");
    };
    assert!(message.starts_with("sh failed: "), "{message}");

    let parts = segments(body);
    assert_eq!(parts.len(), 2);
    assert_eq!(stream_text(parts[0], false), "ok");
    assert_eq!(stream_text(parts[0], true), "");
    assert_eq!(stream_text(parts[1], true), "bad");
    assert!(!run.root.exists());
}

#[tokio::test]
async fn test_output_follows_its_announcement() {
    let base = tempfile::tempdir().unwrap();

    let run = run_pipeline(
        base.path(),
        vec![
            sh("echo first; echo first-err >&2"),
            sh("echo second; echo second-err >&2"),
            sh("echo third > output.bin"),
        ],
        Duration::from_secs(10),
    )
    .await;

    assert!(matches!(run.events[0], Event::Command { .. }));
    let parts = segments(&run.events[..run.events.len() - 1]);
    assert_eq!(parts.len(), 3);
    assert_eq!(stream_text(parts[0], false), "first\n");
    assert_eq!(stream_text(parts[0], true), "first-err\n");
    assert_eq!(stream_text(parts[1], false), "second\n");
    assert_eq!(stream_text(parts[1], true), "second-err\n");
}

#[tokio::test]
async fn test_within_stream_order_is_preserved() {
    let base = tempfile::tempdir().unwrap();

    let run = run_pipeline(
        base.path(),
        vec![sh(
            "i=0; while [ $i -lt 500 ]; do echo out-$i; echo err-$i >&2; i=$((i+1)); done; : > output.bin",
        )],
        Duration::from_secs(20),
    )
    .await;

    let expected_out: String = (0..500).map(|i| format!("out-{i}\n")).collect();
    let expected_err: String = (0..500).map(|i| format!("err-{i}\n")).collect();
    assert_eq!(stream_text(&run.events, false), expected_out);
    assert_eq!(stream_text(&run.events, true), expected_err);
    assert_eq!(run.terminal.decode_artifact().unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn test_artifact_round_trip() {
    let base = tempfile::tempdir().unwrap();
    let bytes: Vec<u8> = (0..=255u8).collect();
    let octal: String = bytes.iter().map(|b| format!("\\{:03o}", b)).collect();

    let run = run_pipeline(
        base.path(),
        vec![sh(&format!("printf '{}' > output.bin", octal))],
        Duration::from_secs(10),
    )
    .await;

    assert_eq!(run.events.last(), Some(&run.terminal));
    assert_eq!(run.terminal.decode_artifact().unwrap(), bytes);
}

#[tokio::test]
async fn test_deadline_ends_run_with_timeout_message() {
    let base = tempfile::tempdir().unwrap();

    let run = run_pipeline(
        base.path(),
        vec![sh("echo working; sleep 30"), sh("echo later > output.bin")],
        Duration::from_millis(500),
    )
    .await;

    let Event::Error { message } = &run.terminal else {
        panic!("expected error, got {:?}", run.terminal);
    };
    assert!(message.starts_with("Compilation timeout"), "{message}");
    assert!(!message.contains(" failed: "));
    assert_eq!(segments(&run.events).len(), 1);
    assert_eq!(run.events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(!run.root.exists());
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let base = tempfile::tempdir().unwrap();

    let (ok, failed) = tokio::join!(
        run_pipeline(
            base.path(),
            vec![sh("pwd > output.bin")],
            Duration::from_secs(10),
        ),
        run_pipeline(
            base.path(),
            vec![sh("pwd; exit 2")],
            Duration::from_secs(10),
        ),
    );

    assert_ne!(ok.root, failed.root);

    let ok_dir = String::from_utf8(ok.terminal.decode_artifact().unwrap()).unwrap();
    assert!(ok_dir.trim_end().ends_with(ok.root.file_name().unwrap().to_str().unwrap()));
    assert!(matches!(failed.terminal, Event::Error { .. }));

    assert!(!ok.root.exists());
    assert!(!failed.root.exists());
    assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_caller_disconnect_stops_run_and_cleans_up() {
    let base = tempfile::tempdir().unwrap();
    let workspace = Workspace::create(base.path()).await.unwrap();
    let root = workspace.root().to_path_buf();
    let request = CancellationToken::new();
    let deadline = Deadline::start(&request, Duration::from_secs(60));
    let (tx, mut rx) = sink::channel(64);
    let sink: Arc<dyn EventSink> = Arc::new(tx);

    let commands = vec![
        sh("echo synthesizing; sleep 30"),
        sh("touch second-ran; echo bits > output.bin"),
    ];
    let run = tokio::spawn(async move {
        let executor = PipelineExecutor::default();
        executor
            .execute(
                executor.begin(),
                PipelineRun::new(workspace, deadline, commands, "output.bin"),
                &sink,
            )
            .await
    });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(&event, Event::Stdout { data } if data.contains("synthesizing")) {
            request.cancel();
        }
        events.push(event);
    }

    let terminal = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("run did not stop after cancellation")
        .unwrap();

    assert_eq!(terminal, Event::error("Compilation cancelled"));
    assert_eq!(events.last(), Some(&terminal));
    assert_eq!(segments(&events).len(), 1);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(!root.exists());
    assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
}
