//! Filesystem enrichment of collected records
//!
//! SSH key records get their key material inlined as text, attachment
//! records get their backing file as base64, and a small set of config
//! files is collected (env files sanitized first). Every read failure is
//! recorded on the record itself - enrichment never aborts a snapshot.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};
use tokio::fs;

use backup_core::record::field_text;
use backup_core::BackupPaths;

use crate::sanitize::EnvSanitizer;

/// Inline private/public key material into ssh key records, marking
/// presence or the read error per file.
pub async fn enrich_ssh_keys(records: &mut [Value], paths: &BackupPaths) {
    for record in records.iter_mut() {
        let Some(key_name) = field_text(record, "key_name") else {
            continue;
        };
        let Some(object) = record.as_object_mut() else {
            continue;
        };

        match fs::read_to_string(paths.private_key_file(&key_name)).await {
            Ok(content) => {
                object.insert("private_key".to_string(), Value::String(content));
                object.insert("private_key_exists".to_string(), Value::Bool(true));
            }
            Err(err) => {
                object.insert("private_key_exists".to_string(), Value::Bool(false));
                object.insert("private_key_error".to_string(), Value::String(err.to_string()));
            }
        }

        match fs::read_to_string(paths.public_key_file(&key_name)).await {
            Ok(content) => {
                object.insert("public_key".to_string(), Value::String(content));
                object.insert("public_key_exists".to_string(), Value::Bool(true));
            }
            Err(err) => {
                object.insert("public_key_exists".to_string(), Value::Bool(false));
                object.insert("public_key_error".to_string(), Value::String(err.to_string()));
            }
        }

        object.insert("filesystem_checked".to_string(), Value::Bool(true));
    }
}

/// Inline attachment payloads as base64, marking missing files.
pub async fn enrich_attachments(records: &mut [Value], paths: &BackupPaths) {
    for record in records.iter_mut() {
        let Some(filename) = field_text(record, "filename") else {
            continue;
        };
        let Some(object) = record.as_object_mut() else {
            continue;
        };

        match fs::read(paths.attachments_dir.join(&filename)).await {
            Ok(bytes) => {
                object.insert("actual_size".to_string(), Value::from(bytes.len() as u64));
                object.insert("file_data".to_string(), Value::String(BASE64.encode(bytes)));
                object.insert("file_exists".to_string(), Value::Bool(true));
            }
            Err(err) => {
                object.insert("file_exists".to_string(), Value::Bool(false));
                object.insert("file_error".to_string(), Value::String(err.to_string()));
            }
        }
    }
}

/// Collect the config files worth carrying in a snapshot: the ssh client
/// config, the backend env file (sanitized), and the reverse-proxy
/// config. Each entry records whether the file existed.
pub async fn collect_config_files(paths: &BackupPaths, sanitizer: &EnvSanitizer) -> Value {
    let mut section = Map::new();

    section.insert(
        "ssh_config".to_string(),
        read_config_entry(&paths.ssh_config_file).await,
    );

    let env_entry = match fs::read_to_string(&paths.env_file).await {
        Ok(content) => json!({ "backend": sanitizer.sanitize(&content) }),
        Err(err) => json!({ "backend_error": err.to_string() }),
    };
    section.insert("env_files".to_string(), env_entry);

    section.insert(
        "proxy_config".to_string(),
        read_config_entry(&paths.proxy_config_file).await,
    );

    Value::Object(section)
}

async fn read_config_entry(path: &Path) -> Value {
    match fs::read_to_string(path).await {
        Ok(content) => json!({ "content": content, "exists": true }),
        Err(err) => json!({ "exists": false, "error": err.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn missing_key_files_are_marked_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BackupPaths::rooted_at(dir.path());
        let mut records = vec![json!({"id": 1, "key_name": "dashboard"})];

        enrich_ssh_keys(&mut records, &paths).await;

        let record = &records[0];
        assert_eq!(record["private_key_exists"], json!(false));
        assert!(record["private_key_error"].is_string());
        assert_eq!(record["filesystem_checked"], json!(true));
        assert!(record.get("private_key").is_none());
    }

    #[tokio::test]
    async fn present_key_files_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BackupPaths::rooted_at(dir.path());
        fs::create_dir_all(&paths.ssh_dir).await.unwrap();
        fs::write(paths.private_key_file("dashboard"), "PRIVATE")
            .await
            .unwrap();
        fs::write(paths.public_key_file("dashboard"), "PUBLIC")
            .await
            .unwrap();

        let mut records = vec![json!({"id": 1, "key_name": "dashboard"})];
        enrich_ssh_keys(&mut records, &paths).await;

        assert_eq!(records[0]["private_key"], json!("PRIVATE"));
        assert_eq!(records[0]["public_key"], json!("PUBLIC"));
        assert_eq!(records[0]["public_key_exists"], json!(true));
    }

    #[tokio::test]
    async fn attachment_payload_is_base64_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BackupPaths::rooted_at(dir.path());
        fs::create_dir_all(&paths.attachments_dir).await.unwrap();
        fs::write(paths.attachments_dir.join("bg.png"), b"\x89PNG")
            .await
            .unwrap();

        let mut records = vec![json!({"id": 1, "filename": "bg.png"})];
        enrich_attachments(&mut records, &paths).await;

        assert_eq!(records[0]["file_exists"], json!(true));
        assert_eq!(records[0]["actual_size"], json!(4));
        assert_eq!(
            records[0]["file_data"],
            json!(BASE64.encode(b"\x89PNG"))
        );
    }
}
