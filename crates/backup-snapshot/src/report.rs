//! Snapshot creation report
//!
//! Returned to the caller after a successful snapshot: where the file
//! landed, how long assembly took, the validation findings, and a data
//! summary of the interesting record kinds.

use std::collections::BTreeMap;

use serde::Serialize;

use backup_core::record::{field, field_text, flag};
use backup_core::{Snapshot, ValidationReport, CONNECTIONS_KEY};

/// Result of one snapshot creation
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotOutcome {
    pub snapshot_id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub duration_ms: u64,
    pub validation: ValidationReport,
    pub summary: DataSummary,
}

/// Counts of the record kinds operators care about
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataSummary {
    pub appliances: ApplianceSummary,
    pub ssh_keys: SshKeySummary,
    pub users: UserSummary,
    pub connections_by_protocol: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplianceSummary {
    pub total: usize,
    pub with_ssh: usize,
    pub with_service_commands: usize,
    pub favorites: usize,
    pub with_remote_desktop: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SshKeySummary {
    pub total: usize,
    pub with_private_key: usize,
    pub with_public_key: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserSummary {
    pub total: usize,
    pub admins: usize,
    pub active: usize,
    pub with_password: usize,
}

/// Summarize the interesting record kinds of a snapshot.
pub fn summarize(snapshot: &Snapshot) -> DataSummary {
    let mut summary = DataSummary::default();

    if let Some(appliances) = snapshot.table("appliances") {
        summary.appliances.total = appliances.len();
        for record in appliances {
            if field(record, "ssh_connection").is_some() {
                summary.appliances.with_ssh += 1;
            }
            if field(record, "start_command").is_some() || field(record, "stop_command").is_some() {
                summary.appliances.with_service_commands += 1;
            }
            if flag(record, "is_favorite") {
                summary.appliances.favorites += 1;
            }
            if flag(record, "remote_desktop_enabled") {
                summary.appliances.with_remote_desktop += 1;
            }
        }
    }

    if let Some(keys) = snapshot.table("ssh_keys") {
        summary.ssh_keys.total = keys.len();
        for record in keys {
            if field(record, "private_key").is_some() {
                summary.ssh_keys.with_private_key += 1;
            }
            if field(record, "public_key").is_some() {
                summary.ssh_keys.with_public_key += 1;
            }
        }
    }

    if let Some(users) = snapshot.table("users") {
        summary.users.total = users.len();
        for record in users {
            if field_text(record, "role").as_deref() == Some("admin") {
                summary.users.admins += 1;
            }
            if flag(record, "is_active") {
                summary.users.active += 1;
            }
            if field(record, "password_hash").is_some() {
                summary.users.with_password += 1;
            }
        }
    }

    if let Some(connections) = snapshot.table(CONNECTIONS_KEY) {
        for record in connections {
            let protocol =
                field_text(record, "protocol").unwrap_or_else(|| "unknown".to_string());
            *summary.connections_by_protocol.entry(protocol).or_insert(0) += 1;
        }
    }

    summary
}
