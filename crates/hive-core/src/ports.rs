// ABOUTME: Port assignment types and the port redirector used inside drones.
// ABOUTME: Rewrites listen requests toward the orchestrator-assigned port.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Flash policy port; drones must keep serving it as requested.
pub const FLASH_POLICY_PORT: u16 = 843;

/// Ports that are never redirected and never handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservedPorts(BTreeSet<u16>);

impl Default for ReservedPorts {
    fn default() -> Self {
        Self(BTreeSet::from([FLASH_POLICY_PORT]))
    }
}

impl ReservedPorts {
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        Self(ports.into_iter().collect())
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.contains(&port)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    /// Parse the comma-separated form used in drone environments.
    /// Entries that are not port numbers are skipped.
    pub fn parse_list(list: &str) -> Self {
        Self::new(
            list.split(',')
                .filter_map(|entry| entry.trim().parse::<u16>().ok()),
        )
    }

    pub fn to_list(&self) -> String {
        self.iter()
            .map(|port| port.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The port the orchestrator allotted to one spawn, plus the host it advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAssignment {
    pub host: String,
    pub port: u16,
}

/// Where a drone asked to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenTarget {
    /// A TCP port, optionally restricted to one interface.
    Port { port: u16, host: Option<String> },
    /// Anything that is not a port number, typically a Unix socket path.
    Path(PathBuf),
}

impl ListenTarget {
    /// Classify the first argument of a listen call.
    ///
    /// Only values that parse as a port number are ports. Everything else,
    /// including negative or out-of-range numbers, is passed through as a path.
    pub fn parse(first: &str, host: Option<&str>) -> Self {
        match first.trim().parse::<u16>() {
            Ok(port) => ListenTarget::Port {
                port,
                host: host.map(str::to_string),
            },
            Err(_) => ListenTarget::Path(PathBuf::from(first)),
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            ListenTarget::Port { port, .. } => Some(*port),
            ListenTarget::Path(_) => None,
        }
    }
}

impl fmt::Display for ListenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenTarget::Port {
                port,
                host: Some(host),
            } if host.contains(':') => write!(f, "[{host}]:{port}"),
            ListenTarget::Port {
                port,
                host: Some(host),
            } => write!(f, "{host}:{port}"),
            ListenTarget::Port { port, host: None } => write!(f, "0.0.0.0:{port}"),
            ListenTarget::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Decides the address a drone actually listens on.
///
/// Injected into the drone context so application code never needs to know
/// that its requested port was reassigned.
pub trait PortResolver: Send + Sync {
    fn resolve(&self, target: ListenTarget) -> ListenTarget;
}

/// Redirects every non-reserved port request to the assigned port.
#[derive(Debug, Clone)]
pub struct PortRedirector {
    assigned: u16,
    reserved: ReservedPorts,
}

impl PortRedirector {
    pub fn new(assigned: u16, reserved: ReservedPorts) -> Self {
        Self { assigned, reserved }
    }

    pub fn assigned(&self) -> u16 {
        self.assigned
    }
}

impl PortResolver for PortRedirector {
    fn resolve(&self, target: ListenTarget) -> ListenTarget {
        match target {
            // 0 asks the OS for an ephemeral port and is left alone.
            ListenTarget::Port { port, host } if port != 0 && !self.reserved.contains(port) => {
                ListenTarget::Port {
                    port: self.assigned,
                    host,
                }
            }
            other => other,
        }
    }
}

/// Resolver that leaves every request untouched, for drones started outside hive.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl PortResolver for Passthrough {
    fn resolve(&self, target: ListenTarget) -> ListenTarget {
        target
    }
}
