// ABOUTME: Registry of running drones per application (user and name).
// ABOUTME: Start through a Spawner, stop every drone of an app, clean an app checkout.

use hive_core::{AppIdentity, PortAssignment, SpawnError, SpawnRequest};
use hive_monitor::MonitorHandle;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::arbiter::SpawnResult;
use crate::spawner::Spawner;

#[derive(Error, Debug)]
pub enum DroneError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("cannot stop application that is not running: {0}")]
    NotRunning(String),

    #[error("failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Summary of one running drone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroneInfo {
    pub app: AppIdentity,
    pub spawn_id: Uuid,
    pub pid: Option<u32>,
    pub socket: PortAssignment,
}

struct RunningDrone {
    app: AppIdentity,
    result: SpawnResult,
}

impl RunningDrone {
    fn info(&self) -> DroneInfo {
        DroneInfo {
            app: self.app.clone(),
            spawn_id: self.result.spawn_id,
            pid: self.result.monitor.pid(),
            socket: self.result.socket.clone(),
        }
    }
}

type Running = Mutex<HashMap<AppIdentity, Vec<RunningDrone>>>;

pub struct Drones<S> {
    spawner: S,
    apps_dir: PathBuf,
    running: Arc<Running>,
}

impl<S: Spawner> Drones<S> {
    pub fn new(spawner: S, apps_dir: impl Into<PathBuf>) -> Self {
        Self {
            spawner,
            apps_dir: apps_dir.into(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn apps_dir(&self) -> &Path {
        &self.apps_dir
    }

    /// Spawn one more drone for the request's app and keep track of it.
    ///
    /// The entry lives until the drone is stopped or its monitor gives up on
    /// its own; either way the port lease goes with it.
    pub async fn start(&self, request: SpawnRequest) -> Result<DroneInfo, DroneError> {
        let app = request.app.clone();
        let result = self.spawner.spawn(request).await?;
        let monitor = result.monitor.clone();
        let drone = RunningDrone { app, result };
        let info = drone.info();

        self.running
            .lock()
            .await
            .entry(info.app.clone())
            .or_default()
            .push(drone);

        tokio::spawn(forget_when_stopped(
            Arc::downgrade(&self.running),
            monitor,
            info.app.clone(),
            info.spawn_id,
        ));
        Ok(info)
    }

    /// Stop every drone of the app and wait for their monitors to finish.
    /// Returns how many drones were stopped.
    pub async fn stop(&self, app: &AppIdentity) -> Result<usize, DroneError> {
        let drones = self
            .running
            .lock()
            .await
            .remove(app)
            .ok_or_else(|| DroneError::NotRunning(app.to_string()))?;

        let count = drones.len();
        for drone in drones {
            stop_monitor(&drone.result.monitor).await;
            tracing::info!(app = %drone.app, spawn_id = %drone.result.spawn_id, "Drone stopped");
        }
        Ok(count)
    }

    /// Stop the app, ignoring stop errors, then remove its checkout.
    pub async fn clean(&self, app: &AppIdentity) -> Result<(), DroneError> {
        app.validate().map_err(|_| {
            DroneError::Spawn(SpawnError::InvalidRequest(
                "Both `user` and `name` are required.".to_string(),
            ))
        })?;

        if let Err(e) = self.stop(app).await {
            tracing::debug!(app = %app, error = %e, "Ignoring stop error while cleaning");
        }

        let path = self.apps_dir.join(&app.user).join(&app.name);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DroneError::Remove { path, source }),
        }
    }

    /// Monitors of every drone still recorded for the app.
    pub async fn handles(&self, app: &AppIdentity) -> Vec<MonitorHandle> {
        self.running
            .lock()
            .await
            .get(app)
            .map(|drones| drones.iter().map(|d| d.result.monitor.clone()).collect())
            .unwrap_or_default()
    }

    /// Drones whose monitor is still supervising.
    pub async fn list(&self) -> Vec<DroneInfo> {
        let running = self.running.lock().await;
        let mut drones: Vec<DroneInfo> = running
            .values()
            .flatten()
            .filter(|drone| !drone.result.monitor.is_stopped())
            .map(RunningDrone::info)
            .collect();
        drones.sort_by(|a, b| {
            (&a.app.name, &a.app.user, a.spawn_id).cmp(&(&b.app.name, &b.app.user, b.spawn_id))
        });
        drones
    }

    /// Stop everything, for orchestrator shutdown.
    pub async fn stop_all(&self) {
        let all: Vec<RunningDrone> = self
            .running
            .lock()
            .await
            .drain()
            .flat_map(|(_, drones)| drones)
            .collect();
        for drone in all {
            stop_monitor(&drone.result.monitor).await;
        }
    }
}

/// Drop the registry entry of a drone once its monitor stops supervising.
/// Dropping the entry releases the drone's port lease.
async fn forget_when_stopped(
    running: Weak<Running>,
    monitor: MonitorHandle,
    app: AppIdentity,
    spawn_id: Uuid,
) {
    monitor.stopped().await;
    let Some(registry) = running.upgrade() else {
        return;
    };

    let mut running = registry.lock().await;
    let Some(drones) = running.get_mut(&app) else {
        return;
    };
    let before = drones.len();
    drones.retain(|drone| drone.result.spawn_id != spawn_id);
    if drones.len() != before {
        tracing::info!(app = %app, spawn_id = %spawn_id, "Drone monitor gave up, forgetting it");
    }
    if drones.is_empty() {
        running.remove(&app);
    }
}

async fn stop_monitor(monitor: &MonitorHandle) {
    monitor.stop();
    monitor.stopped().await;
}
