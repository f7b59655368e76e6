// ABOUTME: Configuration for the hive orchestrator and its spawner.
// ABOUTME: Loaded once from a TOML file with sensible defaults, then shared read-only.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ports::ReservedPorts;
use crate::request::RestartPolicy;

/// Inclusive-exclusive range of ports the orchestrator may hand out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 8001,
            end: 9000,
        }
    }
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host advertised in socket results (e.g., "127.0.0.1" or "drones.example.com")
    #[serde(default = "default_host")]
    pub host: String,

    /// Bootstrap executable used as the first token of every drone command line
    #[serde(default = "default_launcher")]
    pub launcher: String,

    /// Uptime below which an exit during boot counts as spinning
    #[serde(default = "default_min_uptime_ms")]
    pub min_uptime_ms: u64,

    /// Delay before restarting a spinning drone. Unset means spinning drones are not restarted.
    #[serde(default)]
    pub spin_sleep_ms: Option<u64>,

    /// Maximum restarts per drone. Unset means restart forever.
    #[serde(default)]
    pub max_restarts: Option<u32>,

    /// Keep drone environments out of the logs
    #[serde(default)]
    pub hide_env: bool,

    /// Unix socket drones report their bound port on
    #[serde(default = "default_report_socket")]
    pub report_socket: String,

    /// Ports that are never redirected or handed out
    #[serde(default)]
    pub reserved_ports: ReservedPorts,

    /// Directory holding application checkouts as <apps_dir>/<user>/<name>
    #[serde(default = "default_apps_dir")]
    pub apps_dir: String,

    /// Ports available for assignment
    #[serde(default)]
    pub port_range: PortRange,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_launcher() -> String {
    "hive-drone".to_string()
}

fn default_min_uptime_ms() -> u64 {
    2000
}

fn default_report_socket() -> String {
    "/tmp/hive-report.sock".to_string()
}

fn default_apps_dir() -> String {
    "~/.local/share/hive/apps".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            launcher: default_launcher(),
            min_uptime_ms: default_min_uptime_ms(),
            spin_sleep_ms: None,
            max_restarts: None,
            hide_env: false,
            report_socket: default_report_socket(),
            reserved_ports: ReservedPorts::default(),
            apps_dir: default_apps_dir(),
            port_range: PortRange::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        if config.port_range.start >= config.port_range.end {
            anyhow::bail!(
                "port_range in {} is empty ({}..{})",
                path.display(),
                config.port_range.start,
                config.port_range.end
            );
        }
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/hive/hive.toml)
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("hive")
            .join("hive.toml")
    }

    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    pub fn spin_sleep(&self) -> Option<Duration> {
        self.spin_sleep_ms.map(Duration::from_millis)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::from_max(self.max_restarts)
    }

    /// Expand ~ in the report socket path
    pub fn report_socket_expanded(&self) -> PathBuf {
        shellexpand::tilde(&self.report_socket).into_owned().into()
    }

    /// Expand ~ in the apps directory path
    pub fn apps_dir_expanded(&self) -> PathBuf {
        shellexpand::tilde(&self.apps_dir).into_owned().into()
    }
}
