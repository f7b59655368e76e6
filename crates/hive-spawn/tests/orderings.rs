// ABOUTME: Exhaustive ordering test for the spawn arbiter.
// ABOUTME: Every interleaving of start, stdout, two stderr chunks, port, exit and error resolves once.

use hive_core::SpawnError;
use hive_monitor::{CommandLine, ExitInfo, Monitor, MonitorOptions, StartInfo};
use hive_spawn::{Arbiter, Signal};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Start,
    Stdout,
    StderrA,
    StderrB,
    Port,
    Exit,
    Error,
}

fn signal(kind: Kind) -> Signal {
    match kind {
        Kind::Start => Signal::Start(StartInfo {
            pid: 100,
            restarts: 0,
        }),
        Kind::Stdout => Signal::Stdout("listening\n".to_string()),
        Kind::StderrA => Signal::Stderr("err1\n\n".to_string()),
        Kind::StderrB => Signal::Stderr("err2\n".to_string()),
        Kind::Port => Signal::PortReported(4001),
        Kind::Exit => Signal::Exited(ExitInfo {
            code: Some(1),
            spinning: true,
            forced: false,
            restarts: 0,
        }),
        Kind::Error => Signal::Errored(Arc::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ))),
    }
}

/// Stderr lines a chunk contributes to a premature-exit report.
fn stderr_lines(kind: Kind) -> &'static [&'static str] {
    match kind {
        Kind::StderrA => &["err1"],
        Kind::StderrB => &["err2"],
        _ => &[],
    }
}

fn permutations(items: &[Kind]) -> Vec<Vec<Kind>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            all.push(tail);
        }
    }
    all
}

#[test]
fn test_every_ordering_resolves_exactly_once() {
    let kinds = [
        Kind::Start,
        Kind::Stdout,
        Kind::StderrA,
        Kind::StderrB,
        Kind::Port,
        Kind::Exit,
        Kind::Error,
    ];
    let orderings = permutations(&kinds);
    assert_eq!(orderings.len(), 5040);

    for order in orderings {
        let monitor = Monitor::new(
            CommandLine::new("hive-drone"),
            MonitorOptions {
                min_uptime: Duration::from_secs(2),
                ..MonitorOptions::default()
            },
        );
        let handle = monitor.handle();
        let mut arbiter = Arbiter::new(Uuid::nil(), "127.0.0.1", handle.clone());

        let outcomes: Vec<_> = order
            .iter()
            .filter_map(|kind| arbiter.handle(signal(*kind)).map(|outcome| (*kind, outcome)))
            .collect();
        assert_eq!(outcomes.len(), 1, "ordering {order:?}");
        assert!(arbiter.is_resolved());

        let first_terminal = order
            .iter()
            .copied()
            .find(|k| matches!(k, Kind::Port | Kind::Exit | Kind::Error));
        let (winner, outcome) = &outcomes[0];
        assert_eq!(Some(*winner), first_terminal, "ordering {order:?}");

        let before_winner = &order[..order.iter().position(|k| k == winner).unwrap()];
        let start_seen_first = before_winner.contains(&Kind::Start);
        let stderr_before: Vec<&str> = before_winner
            .iter()
            .flat_map(|kind| stderr_lines(*kind).iter().copied())
            .collect();

        match (winner, outcome) {
            (Kind::Port, Ok(result)) => {
                assert_eq!(result.socket.port, 4001);
                assert_eq!(result.drone.is_some(), start_seen_first, "ordering {order:?}");
                assert_eq!(handle.min_uptime(), Duration::ZERO);
            }
            (Kind::Exit, Err(SpawnError::PrematureExit { stderr })) => {
                assert_eq!(*stderr, stderr_before.join("\n"), "ordering {order:?}");
                assert_eq!(handle.min_uptime(), Duration::from_secs(2));
            }
            (Kind::Error, Err(SpawnError::MonitorSpawn(err))) => {
                assert!(err.to_string().contains("no such file"));
                assert_eq!(handle.min_uptime(), Duration::from_secs(2));
            }
            other => panic!("unexpected outcome {other:?} for ordering {order:?}"),
        }
    }
}
