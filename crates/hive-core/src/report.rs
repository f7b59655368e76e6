// ABOUTME: Wire format of the port-report channel between drones and the orchestrator.
// ABOUTME: Newline-delimited JSON over a Unix socket, one report per spawn id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id of the spawn the drone belongs to.
pub const ENV_SPAWN_ID: &str = "HIVE_SPAWN_ID";
/// Path of the report socket.
pub const ENV_REPORT_SOCKET: &str = "HIVE_REPORT_SOCKET";
/// Port the orchestrator assigned.
pub const ENV_PORT: &str = "HIVE_PORT";
/// Host the orchestrator advertises for the drone.
pub const ENV_HOST: &str = "HIVE_HOST";
/// Comma-separated ports the drone must never redirect.
pub const ENV_RESERVED_PORTS: &str = "HIVE_RESERVED_PORTS";

/// Sent by a drone once it is listening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortReport {
    pub spawn_id: Uuid,
    pub port: u16,
}

/// Sent back by the orchestrator for every report line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportReply {
    pub fn accepted() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// Encode one message as a newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    Ok(serde_json::to_string(message)? + "\n")
}
