// ABOUTME: Errors raised while bootstrapping a drone.
// ABOUTME: Every one of them is fatal to the drone process.

use hive_core::ReportError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("invalid startup parameters: {0}")]
    Params(String),

    #[error("failed to isolate drone in {}: {source}", .path.display())]
    Isolation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't find entry script: {}", .0.display())]
    EntryNotFound(PathBuf),

    #[error("failed to run entry script {}: {source}", .path.display())]
    Exec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen on {target}: {source}")]
    Listen {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("entry script did not listen on port {port} within {}s", .timeout.as_secs())]
    NotListening { port: u16, timeout: Duration },

    #[error(transparent)]
    Report(#[from] ReportError),
}
