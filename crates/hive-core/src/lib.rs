// ABOUTME: Shared types and configuration for the hive orchestrator and its drones.
// ABOUTME: Contains config parsing, spawn requests, errors, port redirection and report wire types.

pub mod config;
pub mod error;
pub mod ports;
pub mod report;
pub mod request;

pub use config::{Config, PortRange};
pub use error::{ReportError, SpawnError};
pub use ports::{
    ListenTarget, Passthrough, PortAssignment, PortRedirector, PortResolver, ReservedPorts,
};
pub use report::{PortReport, ReportReply};
pub use request::{AppIdentity, Isolation, PluginSpawn, RestartPolicy, SpawnRequest};
