//! Restore orchestration
//!
//! The state machine walks: environment prep, transaction open,
//! validation gate, referential-integrity toggle, ordered table restore,
//! filesystem restore, external reconcile, post-restore tasks, commit.
//! Any failure before commit rolls the transaction back; filesystem side
//! effects are not rolled back with it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqlitePool;
use sqlx::{Connection, Sqlite};
use tracing::{debug, warn};

use backup_core::{
    AuditSink, BackupError, BackupPaths, BackupResult, ConnectionDefinition, EventBroadcast,
    RestoreOptions, RestoreReport, Snapshot, TableCountCheck, TableOutcome, ValidationReport,
    Validator, VerificationReport, CONNECTIONS_KEY, DOMAIN_TABLES,
};
use backup_env::EnvReconciler;
use backup_guacamole::GuacamoleStore;
use backup_snapshot::SnapshotBuilder;

use crate::fsops;
use crate::log::RestoreLog;
use crate::tables::{self, fetch_host_entries, HostEntry, SqliteTx};

/// Orchestrates re-applying a snapshot to a live system.
///
/// The table-restore phase runs in one transaction on one pooled
/// connection; tables are processed sequentially in dependency order.
///
/// Two documented gaps:
/// - Filesystem writes (secret keys, attachments, generated configs) are
///   not covered by the transaction. A crash between a filesystem write
///   and the commit leaves filesystem state ahead of a rolled-back
///   database.
/// - The external connection store is reconciled in its own independent
///   transaction; there is no two-phase commit across the two stores.
///
/// Nothing guards two concurrent restores against each other - callers
/// must serialize invocations.
pub struct RestoreOrchestrator {
    pool: SqlitePool,
    paths: BackupPaths,
    guacamole: Option<GuacamoleStore>,
    reconciler: Option<Arc<EnvReconciler>>,
    audit: Option<Arc<dyn AuditSink>>,
    events: Option<Arc<dyn EventBroadcast>>,
    validator: Validator,
    hook_timeout: Duration,
}

impl RestoreOrchestrator {
    pub fn new(pool: SqlitePool, paths: BackupPaths) -> Self {
        Self {
            pool,
            paths,
            guacamole: None,
            reconciler: None,
            audit: None,
            events: None,
            validator: Validator::new(),
            hook_timeout: Duration::from_secs(60),
        }
    }

    /// Attach the external connection-store adapter.
    pub fn with_guacamole(mut self, store: GuacamoleStore) -> Self {
        self.guacamole = Some(store);
        self
    }

    /// Attach the environment reconciler.
    pub fn with_reconciler(mut self, reconciler: Arc<EnvReconciler>) -> Self {
        self.reconciler = Some(reconciler);
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

    /// Override the post-restore hook timeout.
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Re-apply a snapshot.
    ///
    /// Returns the accumulated report once the transaction commits, even
    /// when individual records failed or the external reconciliation was
    /// skipped - inspect the per-table outcomes and the log for true
    /// completeness.
    pub async fn restore(
        &self,
        snapshot: &Snapshot,
        options: RestoreOptions,
    ) -> BackupResult<RestoreReport> {
        let started = Instant::now();
        let mut log = RestoreLog::new();
        let mut results = BTreeMap::new();

        log.info(format!("starting restore of snapshot {}", snapshot.id));

        self.prepare_environment(snapshot, &options, &mut log).await;

        let mut conn = self.pool.acquire().await.map_err(BackupError::store)?;

        // Replayed ids and transiently dangling child references require
        // the integrity toggle; SQLite scopes this pragma to the
        // connection and ignores it inside a transaction, so it wraps
        // the transaction instead of living in it.
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await
            .map_err(|err| BackupError::transaction("disable referential integrity", err))?;
        log.info("referential integrity enforcement disabled");

        let phase = self
            .run_transactional_phase(&mut conn, snapshot, &options, &mut results, &mut log)
            .await;

        match sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await
        {
            Ok(_) => log.info("referential integrity enforcement re-enabled"),
            Err(err) => log.warn(format!("could not re-enable referential integrity: {err}")),
        }
        drop(conn);

        let hosts = match phase {
            Ok(hosts) => hosts,
            Err(err) => {
                log.error(format!("restore failed: {err}"));
                return Err(err);
            }
        };

        self.post_restore_filesystem(&hosts, &mut log).await;
        self.run_hook(&mut log).await;
        self.trigger_status_check();

        let duration_ms = started.elapsed().as_millis() as u64;
        log.info(format!("restore completed in {duration_ms} ms"));

        let report = RestoreReport {
            results,
            log: log.into_entries(),
            duration_ms,
            finished_at: Utc::now(),
        };
        self.notify(snapshot, &report).await;
        Ok(report)
    }

    /// Compare restored table counts against the snapshot. Informational;
    /// intended to be called after a restore.
    pub async fn verify_restore(&self, snapshot: &Snapshot) -> BackupResult<VerificationReport> {
        let mut report = VerificationReport::default();

        for table in DOMAIN_TABLES {
            let Some(records) = snapshot.table(table) else {
                continue;
            };
            let actual: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .map_err(BackupError::store)?;
            let expected = records.len() as i64;
            let matched = actual == expected;
            report.tables.insert(
                table.to_string(),
                TableCountCheck {
                    expected,
                    actual,
                    matched,
                },
            );
            if !matched {
                report
                    .issues
                    .push(format!("table {table}: expected {expected}, got {actual}"));
            }
        }

        Ok(report)
    }

    /// Environment prep is best-effort and never fatal to the restore.
    async fn prepare_environment(
        &self,
        snapshot: &Snapshot,
        options: &RestoreOptions,
        log: &mut RestoreLog,
    ) {
        if options.backup_current {
            let builder = SnapshotBuilder::new(self.pool.clone(), self.paths.clone());
            match builder.create_snapshot("pre-restore").await {
                Ok(outcome) => {
                    log.info(format!("current state backed up to {}", outcome.filename));
                }
                Err(err) => log.warn(format!("could not back up current state: {err}")),
            }
        }

        let Some(reconciler) = &self.reconciler else {
            log.info("no environment reconciler configured, skipping environment prep");
            return;
        };

        match reconciler.create_recovery_point().await {
            Some(dir) => log.info(format!("recovery point created at {}", dir.display())),
            None => log.warn("recovery point could not be created"),
        }

        if reconciler.configure_encryption_key(snapshot).await {
            log.info("encryption key configured from snapshot");
        } else {
            log.warn("encryption key could not be configured");
        }
        if reconciler.configure_database_credentials(snapshot).await {
            log.info("database credentials configured from snapshot metadata");
        }

        // A service restart here would invalidate the connection the
        // restore is about to open; readiness is re-checked after commit.
        log.info("service restart deferred until after restore");
    }

    async fn run_transactional_phase(
        &self,
        conn: &mut PoolConnection<Sqlite>,
        snapshot: &Snapshot,
        options: &RestoreOptions,
        results: &mut BTreeMap<String, TableOutcome>,
        log: &mut RestoreLog,
    ) -> BackupResult<Vec<HostEntry>> {
        let mut tx = conn
            .begin()
            .await
            .map_err(|err| BackupError::transaction("open", err))?;
        log.info("transaction started");

        let validation = self.validator.validate(snapshot);
        if let Err(err) = self.check_validation(&validation, options, log) {
            rollback(tx, log).await;
            return Err(err);
        }

        match self.apply_snapshot(&mut tx, snapshot, results, log).await {
            Ok(hosts) => {
                tx.commit()
                    .await
                    .map_err(|err| BackupError::transaction("commit", err))?;
                log.info("transaction committed");
                Ok(hosts)
            }
            Err(err) => {
                rollback(tx, log).await;
                Err(err)
            }
        }
    }

    fn check_validation(
        &self,
        validation: &ValidationReport,
        options: &RestoreOptions,
        log: &mut RestoreLog,
    ) -> BackupResult<()> {
        if !validation.valid {
            if options.force {
                log.warn(format!(
                    "validation failed but restore forced: {}",
                    validation.error_summary()
                ));
            } else {
                return Err(BackupError::Validation(validation.error_summary()));
            }
        }
        if !validation.warnings.is_empty() {
            log.warn(format!(
                "validation warnings: {}",
                validation.warnings.join(", ")
            ));
        }
        Ok(())
    }

    async fn apply_snapshot(
        &self,
        tx: &mut SqliteTx<'_>,
        snapshot: &Snapshot,
        results: &mut BTreeMap<String, TableOutcome>,
        log: &mut RestoreLog,
    ) -> BackupResult<Vec<HostEntry>> {
        for table in DOMAIN_TABLES {
            match snapshot.table(table) {
                Some(records) => {
                    let outcome =
                        match tables::restore_table(tx, table, records, snapshot, &self.paths, log)
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(err) => {
                                results.insert(
                                    table.to_string(),
                                    TableOutcome::Fatal {
                                        error: err.to_string(),
                                    },
                                );
                                return Err(err);
                            }
                        };
                    results.insert(table.to_string(), outcome);
                }
                None => {
                    log.warn(format!("no data found for table {table}"));
                    results.insert(table.to_string(), TableOutcome::Skipped);
                }
            }
        }

        self.restore_config_files(snapshot, log).await;

        let external = self.reconcile_external(snapshot, log).await;
        results.insert(CONNECTIONS_KEY.to_string(), external);

        tables::update_watermarks(tx, &DOMAIN_TABLES, log).await;

        let hosts = match fetch_host_entries(tx).await {
            Ok(hosts) => hosts,
            Err(err) => {
                log.warn(format!("could not read restored hosts: {err}"));
                Vec::new()
            }
        };
        Ok(hosts)
    }

    /// Restore the backed-up ssh client config; env and proxy configs
    /// are collected for reference only and are deliberately not written
    /// back.
    async fn restore_config_files(&self, snapshot: &Snapshot, log: &mut RestoreLog) {
        let Some(section) = snapshot.filesystem() else {
            return;
        };

        if let Some(content) = section
            .get("ssh_config")
            .and_then(|entry| entry.get("content"))
            .and_then(Value::as_str)
        {
            match fsops::write_owner_only(&self.paths.ssh_config_file, content).await {
                Ok(()) => log.info("ssh client config restored from snapshot"),
                Err(err) => log.warn(format!("could not restore ssh client config: {err}")),
            }
        }
        log.info("env and proxy configs not restored");
    }

    /// Reconcile the external connection store in its own transaction.
    /// Unreachability and import failures never fail the restore.
    async fn reconcile_external(&self, snapshot: &Snapshot, log: &mut RestoreLog) -> TableOutcome {
        let Some(records) = snapshot.connections() else {
            return TableOutcome::Skipped;
        };

        let Some(guacamole) = &self.guacamole else {
            log.warn("external connection store not configured, skipping connection restore");
            return TableOutcome::Skipped;
        };
        if !guacamole.is_available().await {
            log.warn("external connection store unavailable, skipping connection restore");
            return TableOutcome::Skipped;
        }

        let mut definitions = Vec::new();
        let mut parse_errors = 0;
        for record in records {
            match serde_json::from_value::<ConnectionDefinition>(record.clone()) {
                Ok(definition) => definitions.push(definition),
                Err(err) => {
                    parse_errors += 1;
                    log.warn(format!("invalid connection definition skipped: {err}"));
                }
            }
        }

        match guacamole.import_connections(&definitions).await {
            Ok(outcome) => {
                log.info(format!(
                    "restored {} external connections, {} errors",
                    outcome.imported,
                    outcome.errors + parse_errors
                ));
                TableOutcome::from_counts(outcome.imported, outcome.errors + parse_errors)
            }
            Err(err) => {
                log.error(format!("failed to restore external connections: {err}"));
                TableOutcome::Partial {
                    restored: 0,
                    errors: 1,
                }
            }
        }
    }

    async fn post_restore_filesystem(&self, hosts: &[HostEntry], log: &mut RestoreLog) {
        match fsops::write_ssh_client_config(&self.paths.ssh_config_file, hosts, &self.paths.ssh_dir)
            .await
        {
            Ok(()) => log.info("ssh client config regenerated from restored hosts"),
            Err(err) => log.warn(format!("could not regenerate ssh client config: {err}")),
        }

        match fsops::fix_secret_permissions(&self.paths.ssh_dir).await {
            Ok(()) => log.info("secret file permissions fixed"),
            Err(err) => log.warn(format!("could not fix secret permissions: {err}")),
        }
    }

    /// Execute the post-restore hook script when present, with a
    /// timeout. Hook failures are warned about, never fatal.
    async fn run_hook(&self, log: &mut RestoreLog) {
        let hook = &self.paths.hook_script;
        match tokio::fs::try_exists(hook).await {
            Ok(true) => {}
            _ => {
                log.info("no post-restore hook found");
                return;
            }
        }

        let run = tokio::process::Command::new("bash")
            .arg(hook)
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.hook_timeout, run).await {
            Ok(Ok(output)) if output.status.success() => {
                log.info("post-restore hook executed");
            }
            Ok(Ok(output)) => {
                log.warn(format!("post-restore hook exited with {}", output.status));
            }
            Ok(Err(err)) => log.warn(format!("post-restore hook failed to start: {err}")),
            Err(_) => log.warn("post-restore hook timed out"),
        }
    }

    /// Fire-and-forget health re-check after commit. Never awaited, so
    /// it cannot extend restore latency; its outcome is log-only.
    fn trigger_status_check(&self) {
        let Some(reconciler) = &self.reconciler else {
            return;
        };
        let reconciler = Arc::clone(reconciler);
        tokio::spawn(async move {
            let report = reconciler.verify_functionality().await;
            if report.backend && report.database {
                debug!(?report, "post-restore status check passed");
            } else {
                warn!(?report, "post-restore status check reported degraded functionality");
            }
        });
    }

    async fn notify(&self, snapshot: &Snapshot, report: &RestoreReport) {
        let restored: usize = report.results.values().map(TableOutcome::restored).sum();
        let errors: usize = report.results.values().map(TableOutcome::errors).sum();
        let metadata = json!({
            "snapshot_id": snapshot.id,
            "duration_ms": report.duration_ms,
            "records_restored": restored,
            "record_errors": errors,
        });
        if let Some(audit) = &self.audit {
            audit.record("backup_restored", metadata.clone()).await;
        }
        if let Some(events) = &self.events {
            events.publish("backup.restored", metadata).await;
        }
    }
}

async fn rollback(tx: SqliteTx<'_>, log: &mut RestoreLog) {
    match tx.rollback().await {
        Ok(()) => log.info("transaction rolled back"),
        Err(err) => log.warn(format!("rollback failed: {err}")),
    }
}
