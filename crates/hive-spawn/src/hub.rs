// ABOUTME: Unix socket that drones report their bound port on.
// ABOUTME: Routes each report to the one spawn registered under its spawn id.

use anyhow::{Context, Result};
use hive_core::report::encode_line;
use hive_core::{PortReport, ReportReply};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::arbiter::Signal;

type Routes = Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<Signal>>>>;

/// Registry of spawns waiting for a port report.
#[derive(Clone, Default)]
pub struct PortReportHub {
    routes: Routes,
}

impl PortReportHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route reports for `spawn_id` into `signals` until the registration is dropped.
    pub fn register(&self, spawn_id: Uuid, signals: mpsc::UnboundedSender<Signal>) -> Registration {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(spawn_id, signals);
        }
        Registration {
            spawn_id,
            routes: self.routes.clone(),
        }
    }

    /// Deliver one report. Fails for ids nobody is waiting on.
    pub fn deliver(&self, report: &PortReport) -> Result<(), String> {
        let routes = self
            .routes
            .lock()
            .map_err(|_| "report routes unavailable".to_string())?;
        let route = routes
            .get(&report.spawn_id)
            .ok_or_else(|| format!("unknown spawn id {}", report.spawn_id))?;
        route
            .send(Signal::PortReported(report.port))
            .map_err(|_| format!("spawn {} already resolved", report.spawn_id))
    }

    pub fn pending(&self) -> usize {
        self.routes.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Bind the report socket, replacing a stale one from a previous run.
    pub fn bind(path: &Path) -> Result<UnixListener> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind report socket {}", path.display()))?;
        tracing::info!(path = %path.display(), "Port report socket listening");
        Ok(listener)
    }

    /// Accept drone connections on `path` until the task is dropped.
    pub async fn serve(self, path: PathBuf) -> Result<()> {
        let listener = Self::bind(&path)?;
        self.serve_listener(listener).await
    }

    /// Accept drone connections on an already bound socket.
    pub async fn serve_listener(self, listener: UnixListener) -> Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            let hub = self.clone();
            tokio::spawn(async move {
                if let Err(e) = hub.handle_connection(stream).await {
                    tracing::warn!(error = %e, "Port report connection error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        while reader.read_line(&mut line).await? > 0 {
            let reply = match serde_json::from_str::<PortReport>(line.trim()) {
                Ok(report) => match self.deliver(&report) {
                    Ok(()) => ReportReply::accepted(),
                    Err(reason) => {
                        tracing::warn!(spawn_id = %report.spawn_id, port = report.port, %reason, "Dropped port report");
                        ReportReply::rejected(reason)
                    }
                },
                Err(e) => ReportReply::rejected(format!("malformed report: {e}")),
            };
            writer.write_all(encode_line(&reply)?.as_bytes()).await?;
            line.clear();
        }

        Ok(())
    }
}

/// Keeps one spawn's route alive; dropping it deregisters the spawn.
pub struct Registration {
    spawn_id: Uuid,
    routes: Routes,
}

impl Registration {
    pub fn spawn_id(&self) -> Uuid {
        self.spawn_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(&self.spawn_id);
        }
    }
}
