//! Snapshot document model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object type used throughout the snapshot document.
///
/// serde_json's default map is BTree-backed, so serializing `data` always
/// yields sorted keys - the canonical form the checksum is computed over.
pub type JsonMap = Map<String, Value>;

/// Domain tables in restore dependency order.
///
/// Parents come before children: categories before the appliances that
/// reference them, appliances and hosts before commands, users and
/// appliances before permissions.
pub const DOMAIN_TABLES: [&str; 11] = [
    "users",
    "categories",
    "appliances",
    "ssh_keys",
    "hosts",
    "commands",
    "settings",
    "attachments",
    "permissions",
    "audit_logs",
    "sessions",
];

/// Key of the sanitized config-file section inside `data`.
pub const FILESYSTEM_KEY: &str = "filesystem";

/// Key of the external connection definitions inside `data`.
pub const CONNECTIONS_KEY: &str = "guacamole_connections";

/// A portable snapshot of the full application state: relational records,
/// filesystem-resident secrets and attachments, and remote-connection
/// definitions held by the external connection store.
///
/// Created once by the snapshot builder and immutable thereafter; the
/// validator and restore orchestrator only ever read it.
///
/// Top-level fields are defaulted on deserialization so that a truncated
/// or hand-edited document still loads and can be *validated* - the
/// validator reports the missing pieces instead of the parser rejecting
/// the file outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// 32 lowercase hex chars
    #[serde(default)]
    pub id: String,
    /// Application version the snapshot was taken from
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Username of the actor that triggered the snapshot
    #[serde(default = "default_created_by")]
    pub created_by: String,
    #[serde(default)]
    pub system_info: SystemInfo,
    /// SHA-256 hex over the canonical serialization of `data`
    #[serde(default)]
    pub checksum: String,
    /// Optional metadata carried by newer snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SnapshotMetadata>,
    /// Domain-table name -> record array, plus the `filesystem` and
    /// `guacamole_connections` sections
    #[serde(default)]
    pub data: JsonMap,
}

impl Snapshot {
    /// Records of a domain table, if present and well-formed.
    pub fn table(&self, name: &str) -> Option<&Vec<Value>> {
        match self.data.get(name) {
            Some(Value::Array(records)) => Some(records),
            _ => None,
        }
    }

    /// External connection definitions carried by the snapshot.
    pub fn connections(&self) -> Option<&Vec<Value>> {
        self.table(CONNECTIONS_KEY)
    }

    /// Sanitized config-file section.
    pub fn filesystem(&self) -> Option<&JsonMap> {
        match self.data.get(FILESYSTEM_KEY) {
            Some(Value::Object(section)) => Some(section),
            _ => None,
        }
    }
}

fn default_created_by() -> String {
    "system".to_string()
}

/// Environment description captured at snapshot time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system family (`std::env::consts::OS`)
    #[serde(default)]
    pub platform: String,
    /// CPU architecture (`std::env::consts::ARCH`)
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub memory: MemoryInfo,
    /// Whether the process runs inside a container
    #[serde(default)]
    pub container: bool,
    #[serde(default)]
    pub backup_timestamp: Option<DateTime<Utc>>,
}

/// Memory totals in megabytes, zero when unavailable
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemoryInfo {
    #[serde(default)]
    pub total_mb: u64,
    #[serde(default)]
    pub free_mb: u64,
}

/// Optional metadata block: explicit encryption key material and the
/// database credentials the snapshot was taken against
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseCredentials>,
}

/// Database credentials carried in snapshot metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
