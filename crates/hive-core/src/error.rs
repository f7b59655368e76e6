// ABOUTME: Error types shared by the hive spawner, monitor and drones.
// ABOUTME: SpawnError is the failure side of every spawn outcome.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Why a spawn did not produce a running, reachable drone.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The request does not describe a usable application.
    #[error("invalid spawn request: {0}")]
    InvalidRequest(String),

    /// The start script is not on disk; nothing was spawned.
    #[error("can't find starting script: {}", .path.display())]
    MissingStartScript { path: PathBuf },

    /// The drone stopped before it reported a port.
    #[error("Error spawning drone")]
    PrematureExit {
        /// Non-empty stderr lines seen before the exit, joined by newlines
        stderr: String,
    },

    /// The process could not be started at the OS level.
    #[error("failed to spawn drone process: {0}")]
    MonitorSpawn(#[source] Arc<std::io::Error>),

    /// Every port in the configured range is reserved or leased.
    #[error("no free port left in {start}..{end}")]
    NoFreePort { start: u16, end: u16 },

    /// The spawner shut down before the spawn resolved.
    #[error("spawn cancelled before resolution")]
    Cancelled,
}

impl SpawnError {
    /// Stderr captured before a premature exit.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            SpawnError::PrematureExit { stderr } => Some(stderr),
            _ => None,
        }
    }
}

/// Errors on the port-report socket.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed port report: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("report rejected: {0}")]
    Rejected(String),

    #[error("report socket closed without a reply")]
    NoReply,
}
