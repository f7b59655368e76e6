// ABOUTME: Startup parameters of a drone: entry script, correlation id, assigned port.
// ABOUTME: Parsed once from the command line and then frozen in a DroneConfig.

use crate::error::BootstrapError;
use clap::Parser;
use hive_core::report::{ENV_HOST, ENV_REPORT_SOCKET, ENV_RESERVED_PORTS, ENV_SPAWN_ID};
use hive_core::ReservedPorts;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Command line of the drone bootstrap.
///
/// Layout: `[OPTIONS] <SCRIPT> <SERVER> <PORT> [ROOT] [APP_PATH] -- [ARGS]...`
#[derive(Parser, Debug, Clone)]
#[command(name = "hive-drone", version, about = "Bootstrap a hive drone")]
pub struct BootstrapArgs {
    /// Run the entry script through this interpreter
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Port that is never redirected, in addition to the inherited set
    #[arg(long = "reserved-port", value_name = "PORT")]
    pub reserved_ports: Vec<u16>,

    /// Seconds to wait for the application to start listening
    #[arg(long, default_value_t = 30)]
    pub ready_timeout: u64,

    /// Entry script of the application
    pub script: PathBuf,

    /// Spawn correlation id of the orchestrator
    pub server: String,

    /// Port assigned by the orchestrator
    pub port: u16,

    /// Directory to isolate the drone in
    pub root: Option<PathBuf>,

    /// Working directory inside ROOT
    pub app_path: Option<PathBuf>,

    /// Arguments passed through to the entry script
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl BootstrapArgs {
    /// Parse the positional layout without the program name, as handed to
    /// a Rust-native drone by the orchestrator.
    pub fn from_positional<I, S>(args: I) -> Result<Self, BootstrapError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = std::iter::once("hive-drone".to_string()).chain(args.into_iter().map(Into::into));
        Self::try_parse_from(argv).map_err(|e| BootstrapError::Params(e.to_string()))
    }

    /// Freeze the arguments together with the inherited environment.
    pub fn into_config(self) -> DroneConfig {
        self.into_config_with(|key| std::env::var(key).ok())
    }

    /// Like [`into_config`](Self::into_config) with an explicit environment lookup.
    pub fn into_config_with(self, env: impl Fn(&str) -> Option<String>) -> DroneConfig {
        let spawn_id = Uuid::parse_str(&self.server)
            .ok()
            .or_else(|| env(ENV_SPAWN_ID).and_then(|id| Uuid::parse_str(&id).ok()));

        let inherited = env(ENV_RESERVED_PORTS)
            .map(|list| ReservedPorts::parse_list(&list))
            .unwrap_or_default();
        let reserved = ReservedPorts::new(inherited.iter().chain(self.reserved_ports));

        DroneConfig {
            script: self.script,
            server: self.server,
            port: self.port,
            root: self.root,
            app_path: self.app_path,
            args: self.args,
            interpreter: self.interpreter,
            reserved,
            spawn_id,
            report_socket: env(ENV_REPORT_SOCKET).map(PathBuf::from),
            host: env(ENV_HOST).filter(|host| !host.is_empty()),
            ready_timeout: Duration::from_secs(self.ready_timeout),
        }
    }
}

/// Immutable drone configuration, shared with everything that runs inside the drone.
#[derive(Debug, Clone)]
pub struct DroneConfig {
    pub script: PathBuf,
    pub server: String,
    pub port: u16,
    pub root: Option<PathBuf>,
    pub app_path: Option<PathBuf>,
    pub args: Vec<String>,
    pub interpreter: Option<String>,
    pub reserved: ReservedPorts,
    /// None when the drone runs outside an orchestrator; no report is sent then.
    pub spawn_id: Option<Uuid>,
    pub report_socket: Option<PathBuf>,
    /// Address the orchestrator hands out for this drone
    pub host: Option<String>,
    pub ready_timeout: Duration,
}
