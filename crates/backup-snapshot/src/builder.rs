//! Snapshot builder

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, warn};

use backup_core::{
    checksum, AuditSink, BackupError, BackupPaths, BackupResult, EventBroadcast, Snapshot,
    Validator, CONNECTIONS_KEY, FILESYSTEM_KEY,
};
use backup_guacamole::GuacamoleStore;

use crate::collect::collect_tables;
use crate::enrich::{collect_config_files, enrich_attachments, enrich_ssh_keys};
use crate::report::{summarize, SnapshotOutcome};
use crate::sanitize::EnvSanitizer;
use crate::store::SnapshotStore;
use crate::sysinfo::{system_info, system_version};

/// Assembles snapshots from the relational store, the filesystem and the
/// external connection store.
///
/// Snapshot creation never mutates the relational store; its only side
/// effect is one file written to the backup directory.
pub struct SnapshotBuilder {
    pool: SqlitePool,
    paths: BackupPaths,
    guacamole: Option<GuacamoleStore>,
    audit: Option<Arc<dyn AuditSink>>,
    events: Option<Arc<dyn EventBroadcast>>,
    sanitizer: EnvSanitizer,
    validator: Validator,
    store: SnapshotStore,
}

impl SnapshotBuilder {
    pub fn new(pool: SqlitePool, paths: BackupPaths) -> Self {
        let store = SnapshotStore::new(paths.backup_dir.clone());
        Self {
            pool,
            paths,
            guacamole: None,
            audit: None,
            events: None,
            sanitizer: EnvSanitizer::new(),
            validator: Validator::new(),
            store,
        }
    }

    /// Attach the external connection-store adapter.
    pub fn with_guacamole(mut self, store: GuacamoleStore) -> Self {
        self.guacamole = Some(store);
        self
    }

    /// Attach the audit-log collaborator.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Attach the event-broadcast collaborator.
    pub fn with_events(mut self, events: Arc<dyn EventBroadcast>) -> Self {
        self.events = Some(events);
        self
    }

    /// The file store this builder persists into.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Assemble, validate and persist a snapshot.
    ///
    /// A structural validation failure aborts before anything is written.
    /// Enrichment and collection failures degrade to per-record markers
    /// and warnings - they never abort.
    pub async fn create_snapshot(&self, created_by: &str) -> BackupResult<SnapshotOutcome> {
        let started = Instant::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        info!(snapshot = %id, created_by, "starting snapshot");

        let mut collection_warnings = Vec::new();
        let mut data = collect_tables(&self.pool, &mut collection_warnings).await;

        if let Some(Value::Array(keys)) = data.get_mut("ssh_keys") {
            enrich_ssh_keys(keys, &self.paths).await;
        }
        if let Some(Value::Array(attachments)) = data.get_mut("attachments") {
            enrich_attachments(attachments, &self.paths).await;
        }

        data.insert(
            FILESYSTEM_KEY.to_string(),
            collect_config_files(&self.paths, &self.sanitizer).await,
        );
        data.insert(CONNECTIONS_KEY.to_string(), self.export_connections().await);

        let digest = checksum(&data)?;
        let snapshot = Snapshot {
            id: id.clone(),
            version: system_version(&self.paths.version_file).await,
            created_at: Some(Utc::now()),
            created_by: created_by.to_string(),
            system_info: system_info().await,
            checksum: digest,
            metadata: None,
            data,
        };

        let validation = self.validator.validate(&snapshot);
        if !validation.valid {
            return Err(BackupError::Validation(validation.error_summary()));
        }
        for warning in validation.warnings.iter().chain(&collection_warnings) {
            warn!(snapshot = %id, warning = %warning, "snapshot warning");
        }

        let saved = self.store.save(&snapshot).await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            snapshot = %id,
            file = %saved.filename,
            size_bytes = saved.size_bytes,
            duration_ms,
            "snapshot written"
        );

        let outcome = SnapshotOutcome {
            snapshot_id: id,
            filename: saved.filename,
            size_bytes: saved.size_bytes,
            duration_ms,
            validation,
            summary: summarize(&snapshot),
        };
        self.notify(&outcome).await;
        Ok(outcome)
    }

    /// Connection definitions from the external store; every failure
    /// mode degrades to an empty export.
    async fn export_connections(&self) -> Value {
        let Some(guacamole) = &self.guacamole else {
            debug!("no guacamole adapter configured");
            return Value::Array(Vec::new());
        };
        if !guacamole.is_available().await {
            info!("guacamole unavailable, skipping connection export");
            return Value::Array(Vec::new());
        }
        match guacamole.export_connections().await {
            Ok(connections) => {
                serde_json::to_value(connections).unwrap_or_else(|_| Value::Array(Vec::new()))
            }
            Err(err) => {
                warn!(error = %err, "could not export guacamole connections");
                Value::Array(Vec::new())
            }
        }
    }

    async fn notify(&self, outcome: &SnapshotOutcome) {
        let metadata = json!({
            "snapshot_id": outcome.snapshot_id,
            "filename": outcome.filename,
            "size_bytes": outcome.size_bytes,
            "duration_ms": outcome.duration_ms,
        });
        if let Some(audit) = &self.audit {
            audit.record("backup_created", metadata.clone()).await;
        }
        if let Some(events) = &self.events {
            events.publish("backup.created", metadata).await;
        }
    }
}
