// ABOUTME: Drone-side runtime for hive: startup parameters, isolation and port reporting.
// ABOUTME: Used by the hive-drone bootstrap binary and by Rust-native drones.

//! A drone is started as
//! `<launcher> [OPTIONS] <SCRIPT> <SERVER> <PORT> [ROOT] [APP_PATH] -- [ARGS]...`.
//!
//! Rust-native drones parse the same layout and open their listeners through
//! a [`DroneContext`], which redirects the requested port to the assigned one
//! and reports it back to the orchestrator:
//!
//! ```ignore
//! let ctx = hive_drone::bootstrap(BootstrapArgs::parse().into_config()).await?;
//! let listener = ctx.listen_on("8080", None).await?;
//! ```

pub mod context;
pub mod entry;
pub mod error;
pub mod isolate;
pub mod params;
pub mod report;

pub use context::{DroneContext, Listener};
pub use error::BootstrapError;
pub use isolate::isolate;
pub use params::{BootstrapArgs, DroneConfig};
pub use report::PortReporter;

use std::sync::Arc;

/// Prepare the drone environment in order: connect the report channel,
/// isolate, then hand out the context.
///
/// The report socket is connected before isolation so it stays reachable
/// from inside the new root.
pub async fn bootstrap(config: DroneConfig) -> Result<DroneContext, BootstrapError> {
    let reporter = match (config.spawn_id, &config.report_socket) {
        (Some(spawn_id), Some(socket)) => {
            let reporter = PortReporter::new(spawn_id, socket);
            reporter.connect().await?;
            Some(Arc::new(reporter))
        }
        _ => {
            tracing::debug!("No report channel configured; port will not be reported");
            None
        }
    };

    if let Some(root) = &config.root {
        isolate(root, config.app_path.as_deref())?;
    }

    Ok(DroneContext::new(Arc::new(config)).with_reporter(reporter))
}
