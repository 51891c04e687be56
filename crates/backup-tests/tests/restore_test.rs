//! Restore orchestrator integration tests
//!
//! Full builder-to-restore round trips plus the failure-policy edges:
//! per-record tolerance, fatal rollback, forced restore, external-store
//! skip, host re-linking and the post-restore hook.

use std::sync::Arc;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

use backup_core::{
    checksum, BackupError, BackupPaths, RestoreOptions, Snapshot, TableOutcome, DOMAIN_TABLES,
};
use backup_guacamole::{GuacamoleConfig, GuacamoleStore};
use backup_restore::RestoreOrchestrator;
use backup_snapshot::SnapshotBuilder;
use backup_tests::{count, seed_minimal, test_pool, RecordingAudit, RecordingEvents};

/// Snapshot with the given data map and a correct checksum.
fn make_snapshot(data: Map<String, Value>) -> Snapshot {
    let digest = checksum(&data).unwrap();
    Snapshot {
        id: "fedcba9876543210fedcba9876543210".to_string(),
        version: "3.1.0".to_string(),
        created_at: Some(Utc::now()),
        created_by: "tester".to_string(),
        system_info: Default::default(),
        checksum: digest,
        metadata: None,
        data,
    }
}

/// Data map with every domain table present and empty.
fn empty_tables() -> Map<String, Value> {
    let mut data = Map::new();
    for table in DOMAIN_TABLES {
        data.insert(table.to_string(), json!([]));
    }
    data
}

async fn seed_stale_state(pool: &sqlx::SqlitePool) {
    sqlx::query(
        "INSERT INTO users (username, email, password_hash) \
         VALUES ('stale', 'stale@example.com', 'old')",
    )
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn full_round_trip_restores_records_and_files() {
    // Source side: seeded store plus filesystem payloads.
    let source_pool = test_pool().await;
    seed_minimal(&source_pool).await;
    let source_dir = tempfile::tempdir().unwrap();
    let source_paths = BackupPaths::rooted_at(source_dir.path());
    tokio::fs::create_dir_all(&source_paths.ssh_dir).await.unwrap();
    tokio::fs::write(source_paths.private_key_file("dashboard"), "PRIVATE")
        .await
        .unwrap();
    tokio::fs::write(source_paths.public_key_file("dashboard"), "PUBLIC")
        .await
        .unwrap();
    tokio::fs::create_dir_all(&source_paths.attachments_dir)
        .await
        .unwrap();
    tokio::fs::write(source_paths.attachments_dir.join("bg.png"), b"\x89PNG")
        .await
        .unwrap();

    let builder = SnapshotBuilder::new(source_pool, source_paths);
    let outcome = builder.create_snapshot("admin").await.unwrap();
    let snapshot = builder.store().load(&outcome.filename).await.unwrap();

    // Target side: stale state that must be replaced.
    let target_pool = test_pool().await;
    seed_stale_state(&target_pool).await;
    let target_dir = tempfile::tempdir().unwrap();
    let target_paths = BackupPaths::rooted_at(target_dir.path());
    tokio::fs::create_dir_all(&target_paths.attachments_dir)
        .await
        .unwrap();
    tokio::fs::write(target_paths.attachments_dir.join("stale.bin"), b"junk")
        .await
        .unwrap();

    let orchestrator = RestoreOrchestrator::new(target_pool.clone(), target_paths.clone());
    let report = orchestrator
        .restore(&snapshot, RestoreOptions::default())
        .await
        .unwrap();

    assert_eq!(report.results["users"], TableOutcome::Ok { restored: 1 });
    assert_eq!(report.results["categories"], TableOutcome::Ok { restored: 1 });
    assert_eq!(report.results["appliances"], TableOutcome::Ok { restored: 1 });
    assert_eq!(report.results["ssh_keys"], TableOutcome::Ok { restored: 1 });
    assert_eq!(report.results["hosts"], TableOutcome::Ok { restored: 1 });
    assert_eq!(report.results["commands"], TableOutcome::Ok { restored: 1 });
    assert_eq!(report.results["attachments"], TableOutcome::Ok { restored: 1 });
    assert!(!report.log.is_empty());

    // Stale relational state is gone.
    assert_eq!(count(&target_pool, "users").await, 1);
    let username: String = sqlx::query_scalar("SELECT username FROM users")
        .fetch_one(&target_pool)
        .await
        .unwrap();
    assert_eq!(username, "admin");

    // Secret material landed with the right permissions.
    let private = tokio::fs::read_to_string(target_paths.private_key_file("dashboard"))
        .await
        .unwrap();
    assert_eq!(private, "PRIVATE");
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let mode = tokio::fs::metadata(target_paths.private_key_file("dashboard"))
            .await
            .unwrap()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    // Attachment directory was cleared and repopulated.
    assert!(!target_paths.attachments_dir.join("stale.bin").exists());
    let payload = tokio::fs::read(target_paths.attachments_dir.join("bg.png"))
        .await
        .unwrap();
    assert_eq!(payload, b"\x89PNG");

    // SSH client config was regenerated from the restored hosts.
    let ssh_config = tokio::fs::read_to_string(&target_paths.ssh_config_file)
        .await
        .unwrap();
    assert!(ssh_config.contains("Host mediabox"));
    assert!(ssh_config.contains("HostName 10.0.0.5"));

    // Post-restore count verification agrees.
    let verification = orchestrator.verify_restore(&snapshot).await.unwrap();
    assert_eq!(verification.issues, Vec::<String>::new());
    assert!(verification.tables.values().all(|check| check.matched));
}

#[tokio::test]
async fn commands_are_relinked_by_natural_key() {
    let mut data = empty_tables();
    // The snapshot claims host id 42; the target will assign a fresh id.
    data.insert(
        "hosts".to_string(),
        json!([{
            "id": 42, "hostname": "mediabox", "host": "10.0.0.5",
            "username": "root", "port": 22, "key_name": "dashboard",
        }]),
    );
    data.insert(
        "commands".to_string(),
        json!([{
            "id": 1, "appliance_id": 1, "description": "restart",
            "command": "systemctl restart jellyfin", "host_id": 42,
        }]),
    );
    let snapshot = make_snapshot(data);

    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator =
        RestoreOrchestrator::new(pool.clone(), BackupPaths::rooted_at(dir.path()));
    let report = orchestrator
        .restore(&snapshot, RestoreOptions::default())
        .await
        .unwrap();

    assert_eq!(report.results["hosts"], TableOutcome::Ok { restored: 1 });
    assert_eq!(report.results["commands"], TableOutcome::Ok { restored: 1 });

    let new_host_id: i64 = sqlx::query_scalar("SELECT id FROM hosts")
        .fetch_one(&pool)
        .await
        .unwrap();
    let linked_host_id: Option<i64> = sqlx::query_scalar("SELECT host_id FROM commands")
        .fetch_one(&pool)
        .await
        .unwrap();
    // Not 42: the command follows the natural key to the fresh id.
    assert_eq!(linked_host_id, Some(new_host_id));
}

#[tokio::test]
async fn per_record_failures_degrade_to_partial() {
    let mut data = empty_tables();
    data.insert(
        "settings".to_string(),
        json!([
            {"id": 1, "user_id": 1, "key": "theme", "value": "dark"},
            {"id": 2, "no_such_column": "boom"},
        ]),
    );
    let snapshot = make_snapshot(data);

    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = RestoreOrchestrator::new(pool.clone(), BackupPaths::rooted_at(dir.path()));
    let report = orchestrator
        .restore(&snapshot, RestoreOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.results["settings"],
        TableOutcome::Partial {
            restored: 1,
            errors: 1
        }
    );
    assert_eq!(count(&pool, "settings").await, 1);
}

#[tokio::test]
async fn tampered_snapshot_is_rejected_unless_forced() {
    let mut snapshot = make_snapshot(empty_tables());
    snapshot.checksum = "0".repeat(64);

    let pool = test_pool().await;
    seed_stale_state(&pool).await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = RestoreOrchestrator::new(pool.clone(), BackupPaths::rooted_at(dir.path()));

    let err = orchestrator
        .restore(&snapshot, RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Validation(_)));
    // Nothing was written.
    assert_eq!(count(&pool, "users").await, 1);

    let report = orchestrator
        .restore(
            &snapshot,
            RestoreOptions {
                force: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.results["users"], TableOutcome::Ok { restored: 0 });
    assert_eq!(count(&pool, "users").await, 0);
}

#[tokio::test]
async fn destructive_failure_rolls_back_everything() {
    let mut data = empty_tables();
    data.insert(
        "users".to_string(),
        json!([{"username": "admin", "email": "admin@example.com", "password_hash": "h"}]),
    );
    let snapshot = make_snapshot(data);

    let pool = test_pool().await;
    seed_stale_state(&pool).await;
    // The commands table is gone, so its destructive delete step fails.
    sqlx::query("DROP TABLE commands").execute(&pool).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let orchestrator = RestoreOrchestrator::new(pool.clone(), BackupPaths::rooted_at(dir.path()));
    let err = orchestrator
        .restore(&snapshot, RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Transaction { .. }));

    // The users table had already been replayed inside the transaction;
    // the rollback restored the stale row.
    let username: String = sqlx::query_scalar("SELECT username FROM users")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(username, "stale");
}

#[tokio::test]
async fn unreachable_external_store_is_a_skip_not_a_failure() {
    let mut data = empty_tables();
    data.insert(
        "guacamole_connections".to_string(),
        json!([{
            "name": "dashboard-jellyfin", "protocol": "vnc",
            "parameters": {"hostname": "10.0.0.5", "port": "5900"},
            "permissions": [],
        }]),
    );
    let snapshot = make_snapshot(data);

    // Port 9 is unassigned; the availability probe fails fast.
    let config = GuacamoleConfig {
        host: "127.0.0.1".to_string(),
        port: 9,
        ..Default::default()
    };
    let store = GuacamoleStore::connect(&config).unwrap();

    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = RestoreOrchestrator::new(pool, BackupPaths::rooted_at(dir.path()))
        .with_guacamole(store);

    let report = orchestrator
        .restore(&snapshot, RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(
        report.results["guacamole_connections"],
        TableOutcome::Skipped
    );
    assert_eq!(report.results["users"], TableOutcome::Ok { restored: 0 });
}

#[tokio::test]
async fn post_restore_hook_runs_and_failure_is_nonfatal() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let paths = BackupPaths::rooted_at(dir.path());

    let marker = dir.path().join("hook-ran");
    tokio::fs::write(
        &paths.hook_script,
        format!("#!/bin/bash\ntouch {}\n", marker.display()),
    )
    .await
    .unwrap();

    let orchestrator = RestoreOrchestrator::new(pool.clone(), paths.clone());
    orchestrator
        .restore(&make_snapshot(empty_tables()), RestoreOptions::default())
        .await
        .unwrap();
    assert!(marker.exists());

    // A failing hook only warns.
    tokio::fs::write(&paths.hook_script, "#!/bin/bash\nexit 1\n")
        .await
        .unwrap();
    let report = orchestrator
        .restore(&make_snapshot(empty_tables()), RestoreOptions::default())
        .await
        .unwrap();
    assert!(report
        .log
        .iter()
        .any(|entry| entry.message.contains("post-restore hook exited")));
}

#[tokio::test]
async fn restore_notifies_collaborators() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();

    let audit = Arc::new(RecordingAudit::default());
    let events = Arc::new(RecordingEvents::default());
    let orchestrator = RestoreOrchestrator::new(pool, BackupPaths::rooted_at(dir.path()))
        .with_audit(audit.clone())
        .with_events(events.clone());

    orchestrator
        .restore(&make_snapshot(empty_tables()), RestoreOptions::default())
        .await
        .unwrap();

    assert_eq!(audit.entries.lock().unwrap()[0].0, "backup_restored");
    assert_eq!(events.events.lock().unwrap()[0].0, "backup.restored");
}
