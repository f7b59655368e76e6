// ABOUTME: Lifecycle events emitted by a running monitor.
// ABOUTME: Subscriptions are plain channels; dropping one deregisters it.

use std::sync::Arc;
use tokio::sync::mpsc;

/// Emitted every time a process is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartInfo {
    pub pid: u32,
    /// Restarts that happened before this launch
    pub restarts: u32,
}

/// Emitted once, when the monitor stops supervising.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Last run ended before the min-uptime threshold
    pub spinning: bool,
    /// The monitor was stopped on request
    pub forced: bool,
    pub restarts: u32,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Start(StartInfo),
    Restart { attempt: u32 },
    /// One chunk read from stdout, not split into lines
    Stdout(String),
    /// One chunk read from stderr, not split into lines
    Stderr(String),
    Exit(ExitInfo),
    /// The OS refused to start the process. Nothing follows.
    Error(Arc<std::io::Error>),
}

impl MonitorEvent {
    /// Exit and Error end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorEvent::Exit(_) | MonitorEvent::Error(_))
    }
}

/// Receiving end of a monitor subscription.
pub type Subscription = mpsc::UnboundedReceiver<MonitorEvent>;
