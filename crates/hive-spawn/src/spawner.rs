// ABOUTME: Spawner capability and the default drone spawner.
// ABOUTME: Checks the request, launches a monitor and waits for the port handshake.

use async_trait::async_trait;
use hive_core::report::{ENV_HOST, ENV_PORT, ENV_REPORT_SOCKET, ENV_RESERVED_PORTS, ENV_SPAWN_ID};
use hive_core::{Config, SpawnError, SpawnRequest};
use hive_monitor::{Monitor, MonitorEvent, MonitorOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::arbiter::{Arbiter, Signal, SpawnOutcome};
use crate::hub::{PortReportHub, Registration};
use crate::launch::LaunchPlan;
use crate::ports::PortAllocator;

/// Starts drones. The orchestrator picks or composes implementations.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Resolve exactly once: a drone that reported its port, or why it did not.
    async fn spawn(&self, request: SpawnRequest) -> SpawnOutcome;
}

/// Spawns drones through the bootstrap launcher and the port-report hub.
#[derive(Clone)]
pub struct DroneSpawner {
    config: Arc<Config>,
    hub: PortReportHub,
    ports: PortAllocator,
}

impl DroneSpawner {
    pub fn new(config: Arc<Config>, hub: PortReportHub) -> Self {
        let ports = PortAllocator::new(config.port_range, config.reserved_ports.clone());
        Self { config, hub, ports }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }
}

#[async_trait]
impl Spawner for DroneSpawner {
    async fn spawn(&self, request: SpawnRequest) -> SpawnOutcome {
        request.validate()?;
        let tag = request.app.to_string();
        tracing::info!(app = %tag, event = "spawn:setup", "Setting up drone");

        let plan = LaunchPlan::build(&self.config.launcher, &request);

        // A missing start script almost always means a bad start entry in the
        // app manifest, so report it before anything is launched.
        let script_path = resolve_script(&request);
        if tokio::fs::metadata(&script_path).await.is_err() {
            return Err(SpawnError::MissingStartScript {
                path: request.start_script.clone(),
            });
        }

        let lease = self.ports.lease().ok_or(SpawnError::NoFreePort {
            start: self.config.port_range.start,
            end: self.config.port_range.end,
        })?;
        let spawn_id = Uuid::new_v4();

        tracing::info!(
            app = %tag,
            spawn_id = %spawn_id,
            event = "spawn:start",
            options = %plan.options.join(" "),
            script = %plan.script.display(),
            arguments = ?plan.script_args,
            port = lease.port(),
            "Starting drone"
        );

        let command = plan
            .with_bootstrap(spawn_id, lease.port(), request.isolation.as_ref())
            .command_line();

        let mut env = request.env.clone();
        env.insert(ENV_SPAWN_ID.to_string(), spawn_id.to_string());
        env.insert(ENV_PORT.to_string(), lease.port().to_string());
        env.insert(ENV_HOST.to_string(), self.config.host.clone());
        env.insert(
            ENV_REPORT_SOCKET.to_string(),
            self.config.report_socket_expanded().display().to_string(),
        );
        env.insert(
            ENV_RESERVED_PORTS.to_string(),
            self.config.reserved_ports.to_list(),
        );

        let monitor = Monitor::new(
            command,
            MonitorOptions {
                tag: tag.clone(),
                cwd: Some(request.cwd.clone()),
                env,
                hide_env: request.hide_env || self.config.hide_env,
                min_uptime: self.config.min_uptime(),
                spin_sleep: self.config.spin_sleep(),
                restart: request.restart,
            },
        );

        // Output is logged for the drone's whole life, not just the handshake.
        let log_tag = tag.clone();
        monitor.listen(move |event| {
            log_output(&log_tag, event);
            true
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let forward = tx.clone();
        monitor.listen(move |event| forward.send(Signal::from(event.clone())).is_ok());
        let registration = self.hub.register(spawn_id, tx);

        let handle = monitor.start();
        let arbiter = Arbiter::new(spawn_id, self.config.host.clone(), handle);
        let mut result = coordinate(arbiter, SignalScope { rx, registration }).await?;
        result.lease = Some(lease);
        Ok(result)
    }
}

/// Every subscription one spawn holds. Dropping it tears all of them down at once.
struct SignalScope {
    rx: mpsc::UnboundedReceiver<Signal>,
    registration: Registration,
}

/// Drive an arbiter until it resolves, then release its subscriptions.
async fn coordinate(mut arbiter: Arbiter, mut scope: SignalScope) -> SpawnOutcome {
    loop {
        let Some(signal) = scope.rx.recv().await else {
            return Err(SpawnError::Cancelled);
        };
        if let Some(outcome) = arbiter.handle(signal) {
            tracing::debug!(spawn_id = %scope.registration.spawn_id(), "Spawn resolved");
            drop(scope);
            return outcome;
        }
    }
}

fn resolve_script(request: &SpawnRequest) -> PathBuf {
    if request.start_script.is_absolute() {
        request.start_script.clone()
    } else {
        request.cwd.join(&request.start_script)
    }
}

fn log_output(tag: &str, event: &MonitorEvent) {
    match event {
        MonitorEvent::Stdout(chunk) => {
            for line in chunk.lines().filter(|l| !l.is_empty()) {
                tracing::info!(app = %tag, event = "drone:stdout", "{line}");
            }
        }
        MonitorEvent::Stderr(chunk) => {
            for line in chunk.lines().filter(|l| !l.is_empty()) {
                tracing::error!(app = %tag, event = "drone:stderr", "{line}");
            }
        }
        _ => {}
    }
}
