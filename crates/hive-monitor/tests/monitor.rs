// ABOUTME: Integration tests for hive-monitor against real shell processes.
// ABOUTME: Covers restart budgets, spin handling, stop, output chunks and spawn failures.

#![cfg(unix)]

use hive_core::RestartPolicy;
use hive_monitor::{CommandLine, ExitInfo, Monitor, MonitorEvent, MonitorOptions, Subscription};
use std::time::Duration;

fn sh(script: &str) -> CommandLine {
    CommandLine::new("/bin/sh").args(["-c", script])
}

fn options(restart: RestartPolicy, min_uptime: Duration) -> MonitorOptions {
    MonitorOptions {
        tag: "test/app".to_string(),
        min_uptime,
        restart,
        ..MonitorOptions::default()
    }
}

async fn collect(mut events: Subscription) -> Vec<MonitorEvent> {
    let mut seen = Vec::new();
    let collecting = async {
        while let Some(event) = events.recv().await {
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collecting)
        .await
        .expect("monitor did not finish in time");
    seen
}

fn starts(events: &[MonitorEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, MonitorEvent::Start(_)))
        .count()
}

fn exit_info(events: &[MonitorEvent]) -> ExitInfo {
    match events.last() {
        Some(MonitorEvent::Exit(info)) => *info,
        other => panic!("expected Exit as last event, got {other:?}"),
    }
}

fn joined_stdout(events: &[MonitorEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Stdout(chunk) => Some(chunk.as_str()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_clean_exit_without_restarts() {
    let monitor = Monitor::new(
        sh("echo hello"),
        options(RestartPolicy::Bounded { max: 0 }, Duration::ZERO),
    );
    let events = monitor.subscribe();
    let handle = monitor.start();

    let events = collect(events).await;
    assert!(matches!(events.first(), Some(MonitorEvent::Start(info)) if info.restarts == 0));
    assert_eq!(joined_stdout(&events), "hello\n");

    let exit = exit_info(&events);
    assert_eq!(exit.code, Some(0));
    assert!(!exit.forced);
    assert!(!exit.spinning);

    handle.stopped().await;
    assert!(handle.is_stopped());
    assert!(!handle.is_running());
}

#[tokio::test]
async fn test_bounded_restarts() {
    let monitor = Monitor::new(
        sh("exit 1"),
        options(RestartPolicy::Bounded { max: 2 }, Duration::ZERO),
    );
    let events = monitor.subscribe();
    let handle = monitor.start();

    let events = collect(events).await;
    assert_eq!(starts(&events), 3);
    let attempts: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Restart { attempt } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);

    let exit = exit_info(&events);
    assert_eq!(exit.code, Some(1));
    assert_eq!(exit.restarts, 2);
    assert_eq!(handle.restarts(), 2);
}

#[tokio::test]
async fn test_stderr_chunks_precede_exit() {
    let monitor = Monitor::new(
        sh("echo err1 >&2; exit 3"),
        options(RestartPolicy::Bounded { max: 0 }, Duration::ZERO),
    );
    let events = monitor.subscribe();
    monitor.start();

    let events = collect(events).await;
    let stderr: String = events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Stderr(chunk) => Some(chunk.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stderr, "err1\n");
    assert_eq!(exit_info(&events).code, Some(3));
}

#[tokio::test]
async fn test_env_and_cwd_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path().canonicalize().unwrap();
    let mut opts = options(RestartPolicy::Bounded { max: 0 }, Duration::ZERO);
    opts.env.insert("HIVE_TEST_VALUE".to_string(), "bar".to_string());
    opts.cwd = Some(cwd.clone());
    opts.hide_env = true;

    let monitor = Monitor::new(sh("echo $HIVE_TEST_VALUE; pwd -P"), opts);
    let events = monitor.subscribe();
    monitor.start();

    let events = collect(events).await;
    let stdout = joined_stdout(&events);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["bar", cwd.to_str().unwrap()]);
}

// ============================================================================
// Min-uptime gate
// ============================================================================

#[tokio::test]
async fn test_spinning_process_is_not_restarted() {
    let monitor = Monitor::new(
        sh("exit 1"),
        options(RestartPolicy::Unbounded, Duration::from_secs(30)),
    );
    let events = monitor.subscribe();
    monitor.start();

    let events = collect(events).await;
    assert_eq!(starts(&events), 1);
    assert!(exit_info(&events).spinning);
}

#[tokio::test]
async fn test_spin_sleep_restarts_spinning_process() {
    let mut opts = options(RestartPolicy::Bounded { max: 1 }, Duration::from_secs(30));
    opts.spin_sleep = Some(Duration::from_millis(10));
    let monitor = Monitor::new(sh("exit 1"), opts);
    let events = monitor.subscribe();
    monitor.start();

    let events = collect(events).await;
    assert_eq!(starts(&events), 2);
    let exit = exit_info(&events);
    assert!(exit.spinning);
    assert_eq!(exit.restarts, 1);
}

#[tokio::test]
async fn test_cleared_gate_restarts_immediately() {
    let monitor = Monitor::new(
        sh("exit 1"),
        options(RestartPolicy::Bounded { max: 1 }, Duration::from_secs(30)),
    );
    monitor.handle().clear_min_uptime();
    let events = monitor.subscribe();
    monitor.start();

    let events = collect(events).await;
    assert_eq!(starts(&events), 2);
    assert!(!exit_info(&events).spinning);
}

// ============================================================================
// Stop and failures
// ============================================================================

#[tokio::test]
async fn test_stop_kills_and_does_not_restart() {
    let monitor = Monitor::new(
        sh("sleep 30"),
        options(RestartPolicy::Unbounded, Duration::ZERO),
    );
    let mut events = monitor.subscribe();
    let handle = monitor.start();

    match events.recv().await {
        Some(MonitorEvent::Start(info)) => {
            assert!(info.pid > 0);
            assert_eq!(handle.pid(), Some(info.pid));
        }
        other => panic!("expected Start, got {other:?}"),
    }

    handle.stop();
    let rest = collect(events).await;
    let exit = exit_info(&rest);
    assert!(exit.forced);
    assert_eq!(starts(&rest), 0);
    assert_eq!(handle.pid(), None);
}

#[tokio::test]
async fn test_missing_program_emits_error_only() {
    let monitor = Monitor::new(
        CommandLine::new("/nonexistent/hive-drone"),
        options(RestartPolicy::Unbounded, Duration::ZERO),
    );
    let events = monitor.subscribe();
    let handle = monitor.start();

    let events = collect(events).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        MonitorEvent::Error(err) => assert_eq!(err.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected Error, got {other:?}"),
    }

    tokio::time::timeout(Duration::from_secs(1), handle.stopped())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_error_without_subscribers_is_harmless() {
    let monitor = Monitor::new(
        CommandLine::new("/nonexistent/hive-drone"),
        options(RestartPolicy::Unbounded, Duration::ZERO),
    );
    let handle = monitor.start();
    tokio::time::timeout(Duration::from_secs(1), handle.stopped())
        .await
        .unwrap();
}
