//! Best-effort environment reconciliation
//!
//! Env files are line-oriented `KEY=value` documents. A recognized key's
//! existing line is rewritten in place; an absent key is inserted right
//! after the first anchor line (so related secrets stay together), or
//! appended at the end.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use backup_core::{BackupError, BackupResult, Snapshot};

use crate::config::EnvConfig;

/// Env variable the derived encryption key is written to
pub const ENCRYPTION_KEY_VAR: &str = "ENCRYPTION_KEY";

/// Partial functionality report after a restore
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FunctionalityReport {
    pub backend: bool,
    pub database: bool,
    pub encryption: bool,
}

/// Reconciles runtime configuration with a snapshot's environment.
///
/// Every public method catches its own failures and degrades to a
/// boolean or `None` - callers never need to guard against errors from
/// this component.
pub struct EnvReconciler {
    config: EnvConfig,
    client: reqwest::Client,
}

impl EnvReconciler {
    pub fn new(config: EnvConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// Extract or derive the snapshot's encryption key and write it into
    /// the managed env files.
    pub async fn configure_encryption_key(&self, snapshot: &Snapshot) -> bool {
        let Some(key) = encryption_key_for(snapshot) else {
            warn!(
                snapshot = %snapshot.id,
                "snapshot carries no encryption key and none could be derived"
            );
            return false;
        };
        self.apply_env_var(ENCRYPTION_KEY_VAR, &key).await
    }

    /// Write database credentials carried in snapshot metadata into the
    /// managed env files. Absent metadata means there is nothing to do.
    pub async fn configure_database_credentials(&self, snapshot: &Snapshot) -> bool {
        let Some(database) = snapshot
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.database.as_ref())
        else {
            debug!("snapshot carries no database credentials");
            return false;
        };

        let port = database.port.map(|port| port.to_string());
        let values = [
            ("DB_HOST", database.host.as_deref()),
            ("DB_PORT", port.as_deref()),
            ("DB_USER", database.user.as_deref()),
            ("DB_PASSWORD", database.password.as_deref()),
            ("DB_NAME", database.name.as_deref()),
        ];

        let mut ok = true;
        for (key, value) in values {
            if let Some(value) = value {
                ok &= self.apply_env_var(key, value).await;
            }
        }
        ok
    }

    async fn apply_env_var(&self, key: &str, value: &str) -> bool {
        let mut ok = true;
        for (path, _) in self.config.env_files() {
            if let Err(err) = update_env_file(path, key, value, &self.config.anchor_keys).await {
                warn!(path = %path.display(), error = %err, "failed to update env file");
                ok = false;
            }
        }
        ok
    }

    /// Copy the current env files aside for manual rollback. Returns the
    /// recovery directory, or `None` when it could not be created.
    pub async fn create_recovery_point(&self) -> Option<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let dir = self.config.recovery_dir.join(stamp);

        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            warn!(path = %dir.display(), error = %err, "failed to create recovery point");
            return None;
        }

        for (path, copy_name) in self.config.env_files() {
            match tokio::fs::copy(path, dir.join(copy_name)).await {
                Ok(_) => debug!(path = %path.display(), "env file copied to recovery point"),
                // A file that does not exist yet has nothing to recover.
                Err(err) => debug!(path = %path.display(), error = %err, "env file not copied"),
            }
        }

        info!(path = %dir.display(), "recovery point created");
        Some(dir)
    }

    /// Poll the health endpoint until it answers or attempts run out.
    pub async fn wait_for_ready(&self, max_attempts: u32) -> bool {
        for attempt in 1..=max_attempts {
            if self.health_ok().await {
                info!(attempt, "service ready");
                return true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        warn!(max_attempts, "service did not become ready");
        false
    }

    /// Probe what works after a restore. The health endpoint only
    /// answers once its database connection is up, so a healthy backend
    /// implies a connected store.
    pub async fn verify_functionality(&self) -> FunctionalityReport {
        let backend = self.health_ok().await;
        let database = backend;
        let encryption = backend && self.current_encryption_key().await.is_some();
        FunctionalityReport {
            backend,
            database,
            encryption,
        }
    }

    async fn health_ok(&self) -> bool {
        match self.client.get(&self.config.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn current_encryption_key(&self) -> Option<String> {
        for (path, _) in self.config.env_files() {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                if let Some(value) = read_env_var(&content, ENCRYPTION_KEY_VAR) {
                    if !value.is_empty() {
                        return Some(value);
                    }
                }
            }
        }
        None
    }
}

/// Explicit key material when the snapshot carries it, else the legacy
/// derivation.
pub fn encryption_key_for(snapshot: &Snapshot) -> Option<String> {
    if let Some(key) = snapshot
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.encryption_key.clone())
    {
        if !key.is_empty() {
            return Some(key);
        }
    }
    derive_legacy_key(snapshot)
}

/// Older snapshots carried no key material; their key was derived from
/// the snapshot id and creation timestamp at backup time, so the same
/// derivation reproduces it here.
fn derive_legacy_key(snapshot: &Snapshot) -> Option<String> {
    if snapshot.id.is_empty() {
        return None;
    }
    let created_at = snapshot.created_at?;
    let stamp = created_at.format("%Y%m%d%H%M%S");
    let digest = hex::encode(Sha256::digest(snapshot.id.as_bytes()));
    Some(format!("enc_backup_{stamp}_{}", &digest[..32]))
}

/// Rewrite `key=` in place, or insert the line near the anchors, or
/// append. Creates the file (and parent directory) when absent.
pub async fn update_env_file(
    path: &Path,
    key: &str,
    value: &str,
    anchors: &[String],
) -> BackupResult<()> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(BackupError::filesystem(err)),
    };

    let updated = upsert_env_line(&content, key, value, anchors);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BackupError::filesystem)?;
        }
    }
    tokio::fs::write(path, updated)
        .await
        .map_err(BackupError::filesystem)
}

fn upsert_env_line(content: &str, key: &str, value: &str, anchors: &[String]) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let needle = format!("{key}=");

    if let Some(line) = lines.iter_mut().find(|line| line.starts_with(&needle)) {
        *line = format!("{key}={value}");
    } else {
        let insert_at = lines
            .iter()
            .position(|line| anchors.iter().any(|anchor| line.contains(anchor.as_str())))
            .map(|index| index + 1)
            .unwrap_or(lines.len());
        lines.insert(insert_at, format!("{key}={value}"));
    }

    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}

fn read_env_var(content: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=");
    content
        .lines()
        .find_map(|line| line.strip_prefix(needle.as_str()).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn anchors() -> Vec<String> {
        vec!["JWT_SECRET".to_string()]
    }

    #[test]
    fn existing_key_is_rewritten_in_place() {
        let content = "A=1\nENCRYPTION_KEY=old\nB=2\n";
        let updated = upsert_env_line(content, "ENCRYPTION_KEY", "new", &anchors());
        assert_eq!(updated, "A=1\nENCRYPTION_KEY=new\nB=2\n");
    }

    #[test]
    fn missing_key_is_inserted_after_anchor() {
        let content = "A=1\nJWT_SECRET=s\nB=2\n";
        let updated = upsert_env_line(content, "ENCRYPTION_KEY", "k", &anchors());
        assert_eq!(updated, "A=1\nJWT_SECRET=s\nENCRYPTION_KEY=k\nB=2\n");
    }

    #[test]
    fn missing_key_without_anchor_is_appended() {
        let content = "A=1\n";
        let updated = upsert_env_line(content, "ENCRYPTION_KEY", "k", &anchors());
        assert_eq!(updated, "A=1\nENCRYPTION_KEY=k\n");
    }

    #[test]
    fn legacy_key_derivation_is_stable() {
        let snapshot = Snapshot {
            id: "0123456789abcdef0123456789abcdef".to_string(),
            version: "1.0.0".to_string(),
            created_at: Some(chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()),
            created_by: "tester".to_string(),
            system_info: Default::default(),
            checksum: String::new(),
            metadata: None,
            data: Default::default(),
        };

        let key = derive_legacy_key(&snapshot).unwrap();
        assert!(key.starts_with("enc_backup_20250102030405_"));
        // prefix + timestamp + 32 hex chars of digest
        assert_eq!(key.len(), "enc_backup_20250102030405_".len() + 32);
        assert_eq!(key, derive_legacy_key(&snapshot).unwrap());
    }

    #[test]
    fn explicit_metadata_key_wins_over_derivation() {
        let mut snapshot = Snapshot {
            id: "0123456789abcdef0123456789abcdef".to_string(),
            version: "1.0.0".to_string(),
            created_at: Some(chrono::Utc::now()),
            created_by: "tester".to_string(),
            system_info: Default::default(),
            checksum: String::new(),
            metadata: None,
            data: Default::default(),
        };
        snapshot.metadata = Some(backup_core::SnapshotMetadata {
            encryption_key: Some("explicit".to_string()),
            database: None,
        });

        assert_eq!(encryption_key_for(&snapshot).unwrap(), "explicit");
    }

    #[tokio::test]
    async fn update_env_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        tokio::fs::write(&path, "JWT_SECRET=s\n").await.unwrap();

        update_env_file(&path, "ENCRYPTION_KEY", "k1", &anchors())
            .await
            .unwrap();
        update_env_file(&path, "ENCRYPTION_KEY", "k2", &anchors())
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "JWT_SECRET=s\nENCRYPTION_KEY=k2\n");
    }

    #[tokio::test]
    async fn recovery_point_copies_env_files() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        tokio::fs::write(&env_file, "A=1\n").await.unwrap();

        let config = EnvConfig {
            env_file: env_file.clone(),
            backend_env_file: dir.path().join("backend/.env"),
            recovery_dir: dir.path().join("recovery"),
            ..Default::default()
        };
        let reconciler = EnvReconciler::new(config);

        let recovery = reconciler.create_recovery_point().await.unwrap();
        let copied = tokio::fs::read_to_string(recovery.join("env.backup"))
            .await
            .unwrap();
        assert_eq!(copied, "A=1\n");
        // The backend env file did not exist; its copy is simply absent.
        assert!(!recovery.join("backend.env.backup").exists());
    }
}
