//! Per-table restore
//!
//! Each table goes through one destructive cycle: delete all rows, reset
//! the identity watermark, insert every snapshot record replaying the
//! original numeric ids. A failure in the destructive step is fatal and
//! aborts the transaction; per-record insert failures are counted and
//! the table moves on.
//!
//! Secret keys and attachments write their filesystem payloads in the
//! same step as the relational insert. Commands are re-linked to hosts
//! through a natural-key translation table instead of trusting the
//! snapshot's numeric host ids.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Row, Sqlite, Transaction};

use backup_core::record::{field_text, flag};
use backup_core::{BackupError, BackupPaths, BackupResult, Snapshot, TableOutcome};

use crate::fsops;
use crate::log::RestoreLog;

/// Transaction type the restore runs in
pub type SqliteTx<'c> = Transaction<'c, Sqlite>;

/// Host row captured after the hosts table landed, used for ssh client
/// config generation
#[derive(Debug, Clone)]
pub struct HostEntry {
    pub hostname: String,
    pub host: String,
    pub username: String,
    pub port: i64,
    pub key_name: String,
    pub is_active: bool,
}

/// Natural-key translation table for host ids.
///
/// Numeric host ids are not stable across environments, so commands are
/// re-linked by (hostname, host, username) against the freshly restored
/// hosts table. Built once per restore.
#[derive(Debug, Default)]
pub struct HostIdMap {
    by_natural_key: HashMap<(String, String, String), i64>,
    snapshot_hosts: HashMap<i64, (String, String, String)>,
}

impl HostIdMap {
    /// Index the rows now in the target plus the snapshot's
    /// old-id -> natural-key mapping.
    pub async fn build(tx: &mut SqliteTx<'_>, snapshot: &Snapshot) -> BackupResult<Self> {
        let mut map = Self::default();

        let rows = sqlx::query("SELECT id, hostname, host, username FROM hosts")
            .fetch_all(&mut **tx)
            .await
            .map_err(BackupError::store)?;
        for row in rows {
            let id: i64 = row.try_get("id").map_err(BackupError::store)?;
            let key = (
                row.try_get("hostname").map_err(BackupError::store)?,
                row.try_get("host").map_err(BackupError::store)?,
                row.try_get("username").map_err(BackupError::store)?,
            );
            map.by_natural_key.insert(key, id);
        }

        if let Some(hosts) = snapshot.table("hosts") {
            for record in hosts {
                let Some(id) = record.get("id").and_then(Value::as_i64) else {
                    continue;
                };
                let (Some(hostname), Some(host), Some(username)) = (
                    field_text(record, "hostname"),
                    field_text(record, "host"),
                    field_text(record, "username"),
                ) else {
                    continue;
                };
                map.snapshot_hosts.insert(id, (hostname, host, username));
            }
        }

        Ok(map)
    }

    /// Translate a snapshot host id to the id of the matching restored
    /// row, if one exists.
    pub fn translate(&self, snapshot_host_id: i64) -> Option<i64> {
        let key = self.snapshot_hosts.get(&snapshot_host_id)?;
        self.by_natural_key.get(key).copied()
    }
}

/// Restore one table inside the transaction.
pub async fn restore_table(
    tx: &mut SqliteTx<'_>,
    table: &str,
    records: &[Value],
    snapshot: &Snapshot,
    paths: &BackupPaths,
    log: &mut RestoreLog,
) -> BackupResult<TableOutcome> {
    log.info(format!(
        "restoring table {table} ({} records)",
        records.len()
    ));

    clear_table(tx, table).await?;

    let outcome = match table {
        "ssh_keys" => restore_ssh_keys(tx, records, paths, log).await?,
        "hosts" => restore_hosts(tx, records, log).await?,
        "attachments" => restore_attachments(tx, records, paths, log).await?,
        "commands" => restore_commands(tx, records, snapshot, log).await?,
        _ => restore_generic(tx, table, records, log).await?,
    };

    log.info(format!(
        "table {table}: {} restored, {} errors",
        outcome.restored(),
        outcome.errors()
    ));
    Ok(outcome)
}

/// Destructive step: delete all rows and reset the identity watermark.
/// Failures here abort the whole restore.
async fn clear_table(tx: &mut SqliteTx<'_>, table: &str) -> BackupResult<()> {
    sqlx::query(&format!("DELETE FROM {table}"))
        .execute(&mut **tx)
        .await
        .map_err(|err| BackupError::transaction(format!("clear {table}"), err))?;

    // Tables without AUTOINCREMENT have no sequence row; in a schema with
    // none at all the sequence table itself is absent, which is equally fine.
    if let Err(err) = sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?")
        .bind(table)
        .execute(&mut **tx)
        .await
    {
        if !err.to_string().contains("no such table") {
            return Err(BackupError::transaction(
                format!("reset {table} identity"),
                err,
            ));
        }
    }
    Ok(())
}

async fn restore_generic(
    tx: &mut SqliteTx<'_>,
    table: &str,
    records: &[Value],
    log: &mut RestoreLog,
) -> BackupResult<TableOutcome> {
    let mut restored = 0;
    let mut errors = 0;
    for (index, record) in records.iter().enumerate() {
        match insert_record(tx, table, record).await {
            Ok(()) => restored += 1,
            Err(err) => {
                errors += 1;
                log.warn(format!("failed to restore record {index} in {table}: {err}"));
            }
        }
    }
    Ok(TableOutcome::from_counts(restored, errors))
}

/// Insert one record with columns taken from the record itself, ids
/// replayed verbatim. Columns the target table does not have make the
/// insert fail, which counts as a per-record error.
async fn insert_record(tx: &mut SqliteTx<'_>, table: &str, record: &Value) -> BackupResult<()> {
    let Some(object) = record.as_object() else {
        return Err(BackupError::store("record is not an object"));
    };

    let mut columns = Vec::new();
    let mut values = Vec::new();
    for (column, value) in object {
        if !is_safe_identifier(column) {
            return Err(BackupError::store(format!(
                "record column {column:?} is not a valid identifier"
            )));
        }
        columns.push(column.as_str());
        values.push(value);
    }
    if columns.is_empty() {
        return Err(BackupError::store("record has no columns"));
    }

    let column_list = columns
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!("INSERT INTO {table} ({column_list}) VALUES ({placeholders})");

    let mut query = sqlx::query(&sql);
    for value in values {
        query = bind_json(query, value);
    }
    query
        .execute(&mut **tx)
        .await
        .map_err(BackupError::store)?;
    Ok(())
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Bind a JSON value to the next placeholder. Nested structures are
/// stored as JSON text.
fn bind_json<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                query.bind(int)
            } else {
                query.bind(n.as_f64())
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

/// Secret keys: relational insert plus the filesystem write in the same
/// step, so a record either fully lands or is counted as one error.
async fn restore_ssh_keys(
    tx: &mut SqliteTx<'_>,
    records: &[Value],
    paths: &BackupPaths,
    log: &mut RestoreLog,
) -> BackupResult<TableOutcome> {
    fsops::prepare_secret_dir(&paths.ssh_dir).await?;

    let mut restored = 0;
    let mut errors = 0;
    for record in records {
        match restore_ssh_key(tx, record, paths).await {
            Ok(()) => restored += 1,
            Err(err) => {
                errors += 1;
                let name = field_text(record, "key_name").unwrap_or_default();
                log.warn(format!("failed to restore ssh key {name}: {err}"));
            }
        }
    }
    Ok(TableOutcome::from_counts(restored, errors))
}

async fn restore_ssh_key(
    tx: &mut SqliteTx<'_>,
    record: &Value,
    paths: &BackupPaths,
) -> BackupResult<()> {
    let key_name = field_text(record, "key_name")
        .ok_or_else(|| BackupError::store("ssh key record missing key_name"))?;
    let now = Utc::now().to_rfc3339();
    let created_at = field_text(record, "created_at").unwrap_or_else(|| now.clone());

    sqlx::query(
        "INSERT INTO ssh_keys \
            (key_name, private_key, public_key, key_type, key_size, comment, \
             passphrase_hash, is_default, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&key_name)
    .bind(field_text(record, "private_key").unwrap_or_default())
    .bind(field_text(record, "public_key").unwrap_or_default())
    .bind(field_text(record, "key_type").unwrap_or_else(|| "rsa".to_string()))
    .bind(record.get("key_size").and_then(Value::as_i64).unwrap_or(2048))
    .bind(field_text(record, "comment").unwrap_or_default())
    .bind(field_text(record, "passphrase_hash"))
    .bind(flag(record, "is_default"))
    .bind(&created_at)
    .bind(field_text(record, "updated_at").unwrap_or(created_at.clone()))
    .execute(&mut **tx)
    .await
    .map_err(BackupError::store)?;

    if let Some(private_key) = field_text(record, "private_key") {
        fsops::write_owner_only(&paths.private_key_file(&key_name), &private_key).await?;
        if let Some(public_key) = field_text(record, "public_key") {
            fsops::write_public_key(&paths.public_key_file(&key_name), &public_key).await?;
        }
    }
    Ok(())
}

/// Hosts: inserted without their snapshot ids - the target assigns
/// fresh ones, and commands are re-linked through [`HostIdMap`].
async fn restore_hosts(
    tx: &mut SqliteTx<'_>,
    records: &[Value],
    log: &mut RestoreLog,
) -> BackupResult<TableOutcome> {
    let mut restored = 0;
    let mut errors = 0;
    for record in records {
        match restore_host(tx, record).await {
            Ok(()) => restored += 1,
            Err(err) => {
                errors += 1;
                let hostname = field_text(record, "hostname").unwrap_or_default();
                log.warn(format!("failed to restore host {hostname}: {err}"));
            }
        }
    }
    Ok(TableOutcome::from_counts(restored, errors))
}

async fn restore_host(tx: &mut SqliteTx<'_>, record: &Value) -> BackupResult<()> {
    let hostname = field_text(record, "hostname")
        .ok_or_else(|| BackupError::store("host record missing hostname"))?;
    let now = Utc::now().to_rfc3339();
    let created_at = field_text(record, "created_at").unwrap_or_else(|| now.clone());

    sqlx::query(
        "INSERT INTO hosts \
            (hostname, host, username, port, key_name, is_active, last_tested, \
             test_status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&hostname)
    .bind(field_text(record, "host"))
    .bind(field_text(record, "username"))
    .bind(record.get("port").and_then(Value::as_i64).unwrap_or(22))
    .bind(field_text(record, "key_name").unwrap_or_else(|| "dashboard".to_string()))
    .bind(match record.get("is_active") {
        Some(_) => flag(record, "is_active"),
        None => true,
    })
    .bind(field_text(record, "last_tested"))
    .bind(field_text(record, "test_status").unwrap_or_else(|| "unknown".to_string()))
    .bind(&created_at)
    .bind(field_text(record, "updated_at").unwrap_or(created_at.clone()))
    .execute(&mut **tx)
    .await
    .map_err(BackupError::store)?;
    Ok(())
}

/// Attachments: clear the directory once, then decode each payload next
/// to its relational insert.
async fn restore_attachments(
    tx: &mut SqliteTx<'_>,
    records: &[Value],
    paths: &BackupPaths,
    log: &mut RestoreLog,
) -> BackupResult<TableOutcome> {
    if let Err(err) = fsops::clear_dir(&paths.attachments_dir).await {
        log.warn(format!("could not clear attachment directory: {err}"));
    }

    let mut restored = 0;
    let mut errors = 0;
    for record in records {
        match restore_attachment(tx, record, paths).await {
            Ok(()) => restored += 1,
            Err(err) => {
                errors += 1;
                let name = field_text(record, "filename").unwrap_or_default();
                log.warn(format!("failed to restore attachment {name}: {err}"));
            }
        }
    }
    Ok(TableOutcome::from_counts(restored, errors))
}

async fn restore_attachment(
    tx: &mut SqliteTx<'_>,
    record: &Value,
    paths: &BackupPaths,
) -> BackupResult<()> {
    let filename = field_text(record, "filename")
        .ok_or_else(|| BackupError::store("attachment record missing filename"))?;

    if let Some(payload) = field_text(record, "file_data") {
        if !flag(record, "file_missing") {
            let bytes = BASE64
                .decode(payload.as_bytes())
                .map_err(|err| BackupError::filesystem(format!("invalid payload: {err}")))?;
            // Only the file name component; a snapshot must not be able
            // to write outside the attachment directory.
            let safe_name = Path::new(&filename)
                .file_name()
                .ok_or_else(|| BackupError::filesystem(format!("unusable filename: {filename}")))?;
            fsops::write_attachment(&paths.attachments_dir.join(safe_name), &bytes).await?;
        }
    }

    sqlx::query(
        "INSERT INTO attachments \
            (filename, original_name, mime_type, file_size, width, height, \
             is_active, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&filename)
    .bind(field_text(record, "original_name").unwrap_or_else(|| filename.clone()))
    .bind(field_text(record, "mime_type").unwrap_or_else(|| "image/jpeg".to_string()))
    .bind(record.get("file_size").and_then(Value::as_i64).unwrap_or(0))
    .bind(record.get("width").and_then(Value::as_i64))
    .bind(record.get("height").and_then(Value::as_i64))
    .bind(flag(record, "is_active"))
    .bind(field_text(record, "created_at").unwrap_or_else(|| Utc::now().to_rfc3339()))
    .execute(&mut **tx)
    .await
    .map_err(BackupError::store)?;
    Ok(())
}

/// Commands: host references are translated through the natural-key map
/// built from the freshly restored hosts table.
async fn restore_commands(
    tx: &mut SqliteTx<'_>,
    records: &[Value],
    snapshot: &Snapshot,
    log: &mut RestoreLog,
) -> BackupResult<TableOutcome> {
    let host_map = HostIdMap::build(tx, snapshot).await?;

    let mut restored = 0;
    let mut errors = 0;
    for record in records {
        match restore_command(tx, record, &host_map).await {
            Ok(()) => restored += 1,
            Err(err) => {
                errors += 1;
                let description = field_text(record, "description").unwrap_or_default();
                log.warn(format!("failed to restore command {description}: {err}"));
            }
        }
    }
    Ok(TableOutcome::from_counts(restored, errors))
}

async fn restore_command(
    tx: &mut SqliteTx<'_>,
    record: &Value,
    host_map: &HostIdMap,
) -> BackupResult<()> {
    let host_id = record
        .get("host_id")
        .and_then(Value::as_i64)
        .and_then(|old_id| host_map.translate(old_id));
    let now = Utc::now().to_rfc3339();
    let created_at = field_text(record, "created_at").unwrap_or_else(|| now.clone());

    sqlx::query(
        "INSERT INTO commands \
            (id, appliance_id, description, command, host_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.get("id").and_then(Value::as_i64))
    .bind(record.get("appliance_id").and_then(Value::as_i64))
    .bind(field_text(record, "description"))
    .bind(field_text(record, "command"))
    .bind(host_id)
    .bind(&created_at)
    .bind(field_text(record, "updated_at").unwrap_or(created_at.clone()))
    .execute(&mut **tx)
    .await
    .map_err(BackupError::store)?;
    Ok(())
}

/// Recompute identity watermarks from the observed maximum id. Tables
/// without an integer id column just log a warning.
pub async fn update_watermarks(tx: &mut SqliteTx<'_>, tables: &[&str], log: &mut RestoreLog) {
    for table in tables {
        if let Err(err) = update_watermark(tx, table).await {
            log.warn(format!(
                "could not update identity watermark for {table}: {err}"
            ));
        }
    }
}

async fn update_watermark(tx: &mut SqliteTx<'_>, table: &str) -> BackupResult<()> {
    let max_id: Option<i64> = sqlx::query_scalar(&format!("SELECT MAX(id) FROM {table}"))
        .fetch_one(&mut **tx)
        .await
        .map_err(BackupError::store)?;
    let Some(max_id) = max_id else {
        return Ok(());
    };

    let updated = sqlx::query("UPDATE sqlite_sequence SET seq = ? WHERE name = ?")
        .bind(max_id)
        .bind(table)
        .execute(&mut **tx)
        .await
        .map_err(BackupError::store)?;
    if updated.rows_affected() == 0 {
        sqlx::query("INSERT INTO sqlite_sequence (name, seq) VALUES (?, ?)")
            .bind(table)
            .bind(max_id)
            .execute(&mut **tx)
            .await
            .map_err(BackupError::store)?;
    }
    Ok(())
}

/// Host rows as restored, for ssh client config generation.
pub async fn fetch_host_entries(tx: &mut SqliteTx<'_>) -> BackupResult<Vec<HostEntry>> {
    let rows = sqlx::query(
        "SELECT hostname, host, username, port, key_name, is_active FROM hosts",
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(BackupError::store)?;

    let mut hosts = Vec::with_capacity(rows.len());
    for row in rows {
        hosts.push(HostEntry {
            hostname: row.try_get("hostname").map_err(BackupError::store)?,
            host: row.try_get("host").map_err(BackupError::store)?,
            username: row.try_get("username").map_err(BackupError::store)?,
            port: row
                .try_get::<Option<i64>, _>("port")
                .map_err(BackupError::store)?
                .unwrap_or(22),
            key_name: row
                .try_get::<Option<String>, _>("key_name")
                .map_err(BackupError::store)?
                .unwrap_or_else(|| "dashboard".to_string()),
            is_active: row
                .try_get::<Option<bool>, _>("is_active")
                .map_err(BackupError::store)?
                .unwrap_or(true),
        });
    }
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_safety() {
        assert!(is_safe_identifier("remote_desktop_enabled"));
        assert!(is_safe_identifier("id"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("name\"; DROP TABLE users; --"));
        assert!(!is_safe_identifier("with space"));
    }
}
