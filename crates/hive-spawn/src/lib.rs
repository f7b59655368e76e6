// ABOUTME: Spawn coordinator for hive drones.
// ABOUTME: Re-exports the Spawner capability, arbiter, port-report hub and drone registry.

//! # hive-spawn
//!
//! Starts drones and waits for them to report the port they bound.
//!
//! A spawn resolves exactly once. The first of three signals decides it:
//!
//! - the drone reports its port on the [`PortReportHub`]: success, carrying
//!   the advertised host and the reported port;
//! - the monitor gives up on the process: [`hive_core::SpawnError::PrematureExit`]
//!   with the stderr lines seen so far;
//! - the process cannot be launched at all: [`hive_core::SpawnError::MonitorSpawn`].
//!
//! ```ignore
//! let config = Arc::new(Config::load(&Config::default_path())?);
//! let hub = PortReportHub::new();
//! tokio::spawn(hub.clone().serve(config.report_socket_expanded()));
//!
//! let spawner = DroneSpawner::new(config, hub);
//! let request = SpawnRequest::new(AppIdentity::new("marak", "hello"), "server.js", "/srv/hello");
//! let drone = spawner.spawn(request).await?;
//! println!("listening on {}:{}", drone.socket.host, drone.socket.port);
//! ```

mod arbiter;
mod drones;
mod hub;
mod launch;
mod ports;
mod spawner;

pub use arbiter::{Arbiter, ResponseGuard, Signal, SpawnOutcome, SpawnResult};
pub use drones::{DroneError, DroneInfo, Drones};
pub use hub::{PortReportHub, Registration};
pub use launch::LaunchPlan;
pub use ports::{PortAllocator, PortLease};
pub use spawner::{DroneSpawner, Spawner};
