//! Structural and semantic snapshot validation
//!
//! Pure checks over an in-memory snapshot document: no I/O, no side
//! effects, and calling [`Validator::validate`] twice on the same
//! snapshot produces the same report.
//!
//! Severity is two-tier. Hard errors make the snapshot unusable (and
//! block restore unless forced): a table value that is not an array, a
//! record missing a structurally required field, a duplicate natural key
//! where duplicates are disallowed, a checksum mismatch. Warnings flag
//! inconsistencies a restore can survive: tolerated duplicate names,
//! half-configured capabilities, missing optional payloads.

use std::collections::HashSet;

use serde_json::Value;

use crate::checksum::checksum;
use crate::models::{
    Snapshot, SnapshotStatistics, TableStats, ValidationReport, CONNECTIONS_KEY, DOMAIN_TABLES,
    KNOWN_PROTOCOLS,
};
use crate::record::{field, field_text, flag};

/// Pure snapshot validator
#[derive(Debug, Clone)]
pub struct Validator {
    required_tables: Vec<&'static str>,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            required_tables: DOMAIN_TABLES.to_vec(),
        }
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a snapshot document.
    pub fn validate(&self, snapshot: &Snapshot) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if snapshot.version.is_empty() {
            errors.push("missing snapshot version".to_string());
        }
        if snapshot.created_at.is_none() {
            errors.push("missing snapshot creation timestamp".to_string());
        }
        if snapshot.data.is_empty() {
            errors.push("missing snapshot data".to_string());
            return ValidationReport {
                valid: false,
                errors,
                warnings,
                statistics: statistics(snapshot),
            };
        }

        for table in &self.required_tables {
            if !snapshot.data.contains_key(*table) {
                warnings.push(format!("missing table: {table}"));
            }
        }

        check_appliances(snapshot, &mut errors, &mut warnings);
        check_categories(snapshot, &mut errors, &mut warnings);
        check_users(snapshot, &mut errors, &mut warnings);
        check_ssh_keys(snapshot, &mut errors, &mut warnings);
        check_attachments(snapshot, &mut errors, &mut warnings);
        check_connections(snapshot, &mut errors, &mut warnings);

        if !snapshot.checksum.is_empty() {
            match checksum(&snapshot.data) {
                Ok(computed) => {
                    if computed != snapshot.checksum {
                        errors.push(
                            "checksum mismatch - snapshot data may be corrupted".to_string(),
                        );
                    }
                }
                Err(err) => errors.push(format!("checksum could not be recomputed: {err}")),
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            statistics: statistics(snapshot),
        }
    }
}

/// Per-table record counts and serialized sizes, plus the overall
/// document size. Informational only.
pub fn statistics(snapshot: &Snapshot) -> SnapshotStatistics {
    let mut tables = std::collections::BTreeMap::new();
    for (name, value) in &snapshot.data {
        let count = value.as_array().map(|records| records.len()).unwrap_or(0);
        let size = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
        tables.insert(name.clone(), TableStats { count, size });
    }

    SnapshotStatistics {
        version: snapshot.version.clone(),
        created_at: snapshot.created_at,
        total_size: serde_json::to_string(snapshot).map(|s| s.len()).unwrap_or(0),
        tables,
    }
}

/// Table records when present; a present non-array value is a hard error.
/// An absent table was already flagged as a warning by the caller.
fn table_records<'a>(
    snapshot: &'a Snapshot,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<&'a [Value]> {
    match snapshot.data.get(name) {
        None => None,
        Some(Value::Array(records)) => Some(records),
        Some(_) => {
            errors.push(format!("{name} must be an array"));
            None
        }
    }
}

fn check_appliances(snapshot: &Snapshot, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let Some(records) = table_records(snapshot, "appliances", errors) else {
        return;
    };

    let mut seen_ids = HashSet::new();
    let mut seen_names = HashSet::new();

    for (index, record) in records.iter().enumerate() {
        let label = field_text(record, "name").unwrap_or_else(|| index.to_string());

        match field_text(record, "id") {
            None => errors.push(format!("appliance at index {index} missing id")),
            Some(id) => {
                if !seen_ids.insert(id.clone()) {
                    errors.push(format!("duplicate appliance id: {id}"));
                }
            }
        }

        match field_text(record, "name") {
            None => errors.push(format!("appliance at index {index} missing name")),
            Some(name) => {
                if !seen_names.insert(name.clone()) {
                    warnings.push(format!("duplicate appliance name: {name}"));
                }
            }
        }

        if field(record, "url").is_none() {
            errors.push(format!("appliance {label} missing url"));
        }

        let has_service_commands = ["start_command", "stop_command", "status_command"]
            .iter()
            .any(|key| field(record, key).is_some());
        if has_service_commands && field(record, "ssh_connection").is_none() {
            warnings.push(format!(
                "appliance {label} has service commands but no ssh connection"
            ));
        }

        if flag(record, "remote_desktop_enabled") {
            if field(record, "remote_host").is_none() {
                warnings.push(format!(
                    "appliance {label} has remote desktop enabled but no host"
                ));
            }
            if field(record, "remote_port").is_none() {
                warnings.push(format!(
                    "appliance {label} has remote desktop enabled but no port"
                ));
            }
        }
    }
}

fn check_categories(snapshot: &Snapshot, errors: &mut Vec<String>, _warnings: &mut Vec<String>) {
    let Some(records) = table_records(snapshot, "categories", errors) else {
        return;
    };

    let mut seen_names = HashSet::new();
    for (index, record) in records.iter().enumerate() {
        match field_text(record, "name") {
            None => errors.push(format!("category at index {index} missing name")),
            Some(name) => {
                if !seen_names.insert(name.clone()) {
                    errors.push(format!("duplicate category name: {name}"));
                }
            }
        }
    }
}

fn check_users(snapshot: &Snapshot, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let Some(records) = table_records(snapshot, "users", errors) else {
        return;
    };

    let mut seen_usernames = HashSet::new();
    let mut seen_emails = HashSet::new();

    for (index, record) in records.iter().enumerate() {
        let label = field_text(record, "username").unwrap_or_else(|| index.to_string());

        match field_text(record, "username") {
            None => errors.push(format!("user at index {index} missing username")),
            Some(username) => {
                if !seen_usernames.insert(username.clone()) {
                    errors.push(format!("duplicate username: {username}"));
                }
            }
        }

        match field_text(record, "email") {
            None => errors.push(format!("user {label} missing email")),
            Some(email) => {
                if !seen_emails.insert(email.clone()) {
                    errors.push(format!("duplicate email: {email}"));
                }
            }
        }

        if field(record, "password_hash").is_none() {
            warnings.push(format!("user {label} missing password hash"));
        }
    }
}

fn check_ssh_keys(snapshot: &Snapshot, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let Some(records) = table_records(snapshot, "ssh_keys", errors) else {
        return;
    };

    for (index, record) in records.iter().enumerate() {
        let label = field_text(record, "key_name").unwrap_or_else(|| index.to_string());

        if field(record, "key_name").is_none() {
            errors.push(format!("ssh key at index {index} missing key_name"));
        }

        // Missing key material without a recorded read error means the
        // builder looked and found nothing - worth surfacing.
        let fs_error = field(record, "filesystem_error").is_some();
        if field(record, "private_key").is_none()
            && !fs_error
            && field(record, "private_key_error").is_none()
        {
            warnings.push(format!("ssh key {label} missing private key data"));
        }
        if field(record, "public_key").is_none()
            && !fs_error
            && field(record, "public_key_error").is_none()
        {
            warnings.push(format!("ssh key {label} missing public key data"));
        }
    }
}

fn check_attachments(snapshot: &Snapshot, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let Some(records) = table_records(snapshot, "attachments", errors) else {
        return;
    };

    for (index, record) in records.iter().enumerate() {
        let label = field_text(record, "filename").unwrap_or_else(|| index.to_string());

        if field(record, "filename").is_none() {
            errors.push(format!("attachment at index {index} missing filename"));
        }
        if field(record, "file_data").is_none()
            && !flag(record, "file_missing")
            && field(record, "file_error").is_none()
        {
            warnings.push(format!("attachment {label} missing file data"));
        }
    }
}

fn check_connections(snapshot: &Snapshot, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    // External connections are optional; only a present non-array is an error.
    let Some(records) = table_records(snapshot, CONNECTIONS_KEY, errors) else {
        return;
    };

    for (index, record) in records.iter().enumerate() {
        let label = field_text(record, "name").unwrap_or_else(|| index.to_string());

        if field(record, "name").is_none() {
            errors.push(format!("connection at index {index} missing name"));
        }
        match field_text(record, "protocol") {
            None => errors.push(format!("connection {label} missing protocol")),
            Some(protocol) => {
                if !KNOWN_PROTOCOLS.contains(&protocol.as_str()) {
                    warnings.push(format!(
                        "connection {label} has unknown protocol: {protocol}"
                    ));
                }
            }
        }
        if !matches!(record.get("parameters"), Some(Value::Object(_))) {
            warnings.push(format!("connection {label} missing parameters"));
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::models::JsonMap;

    fn data_map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn snapshot_with(data: JsonMap) -> Snapshot {
        let digest = checksum(&data).unwrap();
        Snapshot {
            id: "0123456789abcdef0123456789abcdef".to_string(),
            version: "1.0.0".to_string(),
            created_at: Some(Utc::now()),
            created_by: "tester".to_string(),
            system_info: Default::default(),
            checksum: digest,
            metadata: None,
            data,
        }
    }

    fn minimal_data() -> JsonMap {
        data_map(json!({
            "appliances": [{"id": 1, "name": "svc", "url": "http://x"}],
            "categories": [],
            "users": [{"username": "a", "email": "a@b.com", "password_hash": "h"}],
        }))
    }

    #[test]
    fn minimal_snapshot_is_valid() {
        let snapshot = snapshot_with(minimal_data());
        let report = Validator::new().validate(&snapshot);

        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert_eq!(report.errors, Vec::<String>::new());
        // Absent tables surface as warnings, never as errors.
        assert!(report.warnings.iter().any(|w| w.contains("missing table")));
    }

    #[test]
    fn validation_is_idempotent() {
        let snapshot = snapshot_with(minimal_data());
        let validator = Validator::new();

        let first = validator.validate(&snapshot);
        let second = validator.validate(&snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn mutated_data_reports_checksum_mismatch_only() {
        let mut snapshot = snapshot_with(minimal_data());
        let baseline = Validator::new().validate(&snapshot);

        if let Some(Value::Array(appliances)) = snapshot.data.get_mut("appliances") {
            appliances[0]["name"] = json!("renamed");
        }
        let report = Validator::new().validate(&snapshot);

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("checksum mismatch"));
        assert_eq!(report.warnings, baseline.warnings);
    }

    #[test]
    fn duplicate_appliance_id_is_an_error() {
        let mut data = minimal_data();
        data.insert(
            "appliances".to_string(),
            json!([
                {"id": 1, "name": "one", "url": "http://x"},
                {"id": 1, "name": "two", "url": "http://y"},
            ]),
        );
        let report = Validator::new().validate(&snapshot_with(data));

        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("duplicate appliance id: 1")));
    }

    #[test]
    fn duplicate_appliance_name_is_a_warning() {
        let mut data = minimal_data();
        data.insert(
            "appliances".to_string(),
            json!([
                {"id": 1, "name": "same", "url": "http://x"},
                {"id": 2, "name": "same", "url": "http://y"},
            ]),
        );
        let report = Validator::new().validate(&snapshot_with(data));

        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("duplicate appliance name: same")));
    }

    #[test]
    fn non_array_table_is_an_error() {
        let mut data = minimal_data();
        data.insert("users".to_string(), json!("oops"));
        let report = Validator::new().validate(&snapshot_with(data));

        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e == "users must be an array"));
    }

    #[test]
    fn missing_data_short_circuits() {
        let mut snapshot = snapshot_with(minimal_data());
        snapshot.data = JsonMap::new();
        snapshot.checksum = String::new();

        let report = Validator::new().validate(&snapshot);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["missing snapshot data".to_string()]);
    }

    #[test]
    fn user_without_email_is_an_error() {
        let mut data = minimal_data();
        data.insert(
            "users".to_string(),
            json!([{"username": "a", "password_hash": "h"}]),
        );
        let report = Validator::new().validate(&snapshot_with(data));

        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("missing email")));
    }

    #[test]
    fn service_commands_without_connection_warn() {
        let mut data = minimal_data();
        data.insert(
            "appliances".to_string(),
            json!([{
                "id": 1, "name": "svc", "url": "http://x",
                "start_command": "systemctl start svc",
            }]),
        );
        let report = Validator::new().validate(&snapshot_with(data));

        assert!(report.valid);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("service commands but no ssh connection")));
    }

    #[test]
    fn unknown_connection_protocol_warns() {
        let mut data = minimal_data();
        data.insert(
            CONNECTIONS_KEY.to_string(),
            json!([{
                "name": "dashboard-svc",
                "protocol": "x11",
                "parameters": {"hostname": "h"},
            }]),
        );
        let report = Validator::new().validate(&snapshot_with(data));

        assert!(report.valid);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("unknown protocol: x11")));
    }

    #[test]
    fn statistics_count_tables() {
        let snapshot = snapshot_with(minimal_data());
        let stats = statistics(&snapshot);

        assert_eq!(stats.tables["appliances"].count, 1);
        assert_eq!(stats.tables["categories"].count, 0);
        assert_eq!(stats.tables["users"].count, 1);
        assert!(stats.total_size > 0);
    }
}
