//! External remote-connection definitions
//!
//! Connections owned by the dashboard live in the external connection
//! store under a recognizable name prefix, so export and restore never
//! touch definitions the dashboard does not own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Protocols the remote-desktop gateway understands
pub const KNOWN_PROTOCOLS: [&str; 4] = ["vnc", "rdp", "ssh", "telnet"];

/// Name prefix marking connections owned by the dashboard
pub const CONNECTION_PREFIX: &str = "dashboard-";

/// One remote-connection definition, as exported from and re-imported
/// into the external connection store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    /// Connection name, always starting with [`CONNECTION_PREFIX`]
    pub name: String,
    /// Protocol tag (see [`KNOWN_PROTOCOLS`])
    pub protocol: String,
    /// Protocol parameters (hostname, port, password, ...)
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Permission grants, re-mapped by principal lookup on import
    #[serde(default)]
    pub permissions: Vec<PermissionGrant>,
    /// Parent connection group in the source store, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections_per_user: Option<i32>,
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default)]
    pub failover_only: bool,
}

fn default_weight() -> i32 {
    1
}

impl ConnectionDefinition {
    /// Whether the protocol tag is one the gateway understands.
    pub fn has_known_protocol(&self) -> bool {
        KNOWN_PROTOCOLS.contains(&self.protocol.as_str())
    }
}

/// A permission grant on a connection.
///
/// Principal ids are not portable across stores; grants carry the
/// principal's name and type instead and are resolved against the target
/// store on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub principal_name: String,
    /// "USER" or "USER_GROUP"
    pub principal_type: String,
    /// e.g. "READ"
    pub permission: String,
}

/// Result of importing connection definitions into the external store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub imported: usize,
    pub errors: usize,
}
