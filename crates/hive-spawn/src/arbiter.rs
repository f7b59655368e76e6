// ABOUTME: Resolves one spawn outcome from racing drone signals.
// ABOUTME: Start, output, port report, exit and error; the first terminal signal wins.

use hive_core::{PortAssignment, SpawnError};
use hive_monitor::{ExitInfo, MonitorEvent, MonitorHandle, StartInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::ports::PortLease;

/// Everything that can happen to one spawn while it is unresolved.
#[derive(Debug, Clone)]
pub enum Signal {
    Start(StartInfo),
    Restart { attempt: u32 },
    Stdout(String),
    Stderr(String),
    PortReported(u16),
    Exited(ExitInfo),
    Errored(Arc<std::io::Error>),
}

impl From<MonitorEvent> for Signal {
    fn from(event: MonitorEvent) -> Self {
        match event {
            MonitorEvent::Start(info) => Signal::Start(info),
            MonitorEvent::Stdout(chunk) => Signal::Stdout(chunk),
            MonitorEvent::Stderr(chunk) => Signal::Stderr(chunk),
            MonitorEvent::Exit(info) => Signal::Exited(info),
            MonitorEvent::Error(err) => Signal::Errored(err),
            MonitorEvent::Restart { attempt } => Signal::Restart { attempt },
        }
    }
}

/// A drone that completed its handshake.
#[derive(Debug)]
pub struct SpawnResult {
    pub spawn_id: Uuid,
    pub monitor: MonitorHandle,
    /// Launch that was running when the port arrived, if a Start was seen
    pub drone: Option<StartInfo>,
    /// Advertised host and the port the drone actually bound
    pub socket: PortAssignment,
    /// Assignment held for as long as the drone runs
    pub lease: Option<PortLease>,
}

impl SpawnResult {
    pub fn pid(&self) -> Option<u32> {
        self.drone.map(|info| info.pid)
    }
}

pub type SpawnOutcome = Result<SpawnResult, SpawnError>;

/// Set-once flag; the first caller of `claim` wins.
#[derive(Debug, Default)]
pub struct ResponseGuard(AtomicBool);

impl ResponseGuard {
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State machine of one spawn.
///
/// `handle` never awaits, so checking the guard, acting and setting it
/// happen in one step as far as the scheduler is concerned.
pub struct Arbiter {
    spawn_id: Uuid,
    tag: String,
    host: String,
    monitor: MonitorHandle,
    guard: ResponseGuard,
    started: Option<StartInfo>,
    stderr: Vec<String>,
}

impl Arbiter {
    pub fn new(spawn_id: Uuid, host: impl Into<String>, monitor: MonitorHandle) -> Self {
        Self {
            spawn_id,
            tag: monitor.tag().to_string(),
            host: host.into(),
            monitor,
            guard: ResponseGuard::default(),
            started: None,
            stderr: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.guard.is_set()
    }

    /// Feed one signal. Returns the outcome exactly once, for the first
    /// port report, exit or error; every later signal returns None.
    pub fn handle(&mut self, signal: Signal) -> Option<SpawnOutcome> {
        match signal {
            Signal::Start(info) => {
                self.started = Some(info);
                None
            }
            // A restart is followed by its own Start.
            Signal::Restart { .. } | Signal::Stdout(_) => None,
            Signal::Stderr(chunk) => {
                if !self.guard.is_set() {
                    self.stderr.extend(
                        chunk
                            .split('\n')
                            .filter(|line| !line.is_empty())
                            .map(str::to_string),
                    );
                }
                None
            }
            Signal::PortReported(port) => {
                if !self.guard.claim() {
                    return None;
                }
                self.monitor.clear_min_uptime();
                tracing::info!(app = %self.tag, spawn_id = %self.spawn_id, port, "Drone reported its port");
                Some(Ok(SpawnResult {
                    spawn_id: self.spawn_id,
                    monitor: self.monitor.clone(),
                    drone: self.started,
                    socket: PortAssignment {
                        host: self.host.clone(),
                        port,
                    },
                    lease: None,
                }))
            }
            Signal::Exited(info) => {
                if !self.guard.claim() {
                    return None;
                }
                tracing::warn!(app = %self.tag, spawn_id = %self.spawn_id, code = ?info.code, "Drone exited before reporting a port");
                Some(Err(SpawnError::PrematureExit {
                    stderr: std::mem::take(&mut self.stderr).join("\n"),
                }))
            }
            Signal::Errored(err) => {
                if !self.guard.claim() {
                    return None;
                }
                Some(Err(SpawnError::MonitorSpawn(err)))
            }
        }
    }
}
