// ABOUTME: Process monitor: runs one drone process and keeps it alive.
// ABOUTME: Re-exports Monitor, MonitorHandle and the lifecycle event types.

mod command;
mod event;
mod monitor;

pub use command::CommandLine;
pub use event::{ExitInfo, MonitorEvent, StartInfo, Subscription};
pub use monitor::{Monitor, MonitorHandle, MonitorOptions};
