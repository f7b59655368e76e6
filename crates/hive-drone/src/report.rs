// ABOUTME: Client side of the port-report socket.
// ABOUTME: Tells the orchestrator which port this drone ended up listening on.

use hive_core::report::encode_line;
use hive_core::{PortReport, ReportError, ReportReply};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Reports the bound port for one spawn id.
///
/// The connection can be opened early with [`connect`](Self::connect), which
/// keeps the socket reachable after the drone has been isolated in a chroot.
pub struct PortReporter {
    spawn_id: Uuid,
    socket: PathBuf,
    stream: Mutex<Option<BufReader<UnixStream>>>,
}

impl PortReporter {
    pub fn new(spawn_id: Uuid, socket: impl Into<PathBuf>) -> Self {
        Self {
            spawn_id,
            socket: socket.into(),
            stream: Mutex::new(None),
        }
    }

    pub fn spawn_id(&self) -> Uuid {
        self.spawn_id
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Open the connection now instead of on the first report.
    pub async fn connect(&self) -> Result<(), ReportError> {
        let mut stream = self.stream.lock().await;
        if stream.is_none() {
            *stream = Some(BufReader::new(UnixStream::connect(&self.socket).await?));
        }
        Ok(())
    }

    /// Send one report and wait for the orchestrator's reply.
    pub async fn report(&self, port: u16) -> Result<(), ReportError> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(BufReader::new(UnixStream::connect(&self.socket).await?));
        }
        let stream = guard.as_mut().ok_or(ReportError::NoReply)?;

        let line = encode_line(&PortReport {
            spawn_id: self.spawn_id,
            port,
        })?;
        stream.get_mut().write_all(line.as_bytes()).await?;

        let mut reply = String::new();
        if stream.read_line(&mut reply).await? == 0 {
            *guard = None;
            return Err(ReportError::NoReply);
        }

        let reply: ReportReply = serde_json::from_str(reply.trim())?;
        if reply.success {
            tracing::info!(spawn_id = %self.spawn_id, port, "Reported drone port");
            Ok(())
        } else {
            Err(ReportError::Rejected(
                reply.error.unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}
