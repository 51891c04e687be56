//! Snapshot file store
//!
//! Snapshots live as pretty-printed JSON documents in one backup
//! directory, named `backup_<timestamp>_<id>.json`. The store lists,
//! loads and prunes them; documents themselves are immutable.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

use backup_core::{BackupError, BackupResult, Snapshot, Validator};

/// Listing entry for one snapshot file
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub id: String,
    pub version: String,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: String,
    /// Result of validating the file while listing
    pub valid: bool,
}

/// Result of a retention cleanup pass
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CleanupOutcome {
    pub deleted: usize,
    pub kept: usize,
}

/// A snapshot persisted by [`SnapshotStore::save`]
#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// File store for snapshot documents
pub struct SnapshotStore {
    backup_dir: PathBuf,
    validator: Validator,
}

impl SnapshotStore {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            validator: Validator::new(),
        }
    }

    /// Persist a snapshot document.
    pub async fn save(&self, snapshot: &Snapshot) -> BackupResult<SavedSnapshot> {
        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(BackupError::filesystem)?;

        let filename = snapshot_filename(snapshot);
        let path = self.backup_dir.join(&filename);
        let payload = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&path, &payload)
            .await
            .map_err(BackupError::filesystem)?;

        Ok(SavedSnapshot {
            filename,
            path,
            size_bytes: payload.len() as u64,
        })
    }

    /// Load a snapshot by bare filename.
    pub async fn load(&self, filename: &str) -> BackupResult<Snapshot> {
        if Path::new(filename).components().count() != 1 {
            return Err(BackupError::Config(format!(
                "snapshot filename must not contain path components: {filename}"
            )));
        }

        let path = self.backup_dir.join(filename);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(filename.to_string()));
            }
            Err(err) => return Err(BackupError::filesystem(err)),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    /// List snapshot files, newest first. Unreadable files are logged
    /// and skipped.
    pub async fn list(&self) -> BackupResult<Vec<SnapshotEntry>> {
        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(BackupError::filesystem)?;

        let mut dir = fs::read_dir(&self.backup_dir)
            .await
            .map_err(BackupError::filesystem)?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(BackupError::filesystem)? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !filename.starts_with("backup_") || !filename.ends_with(".json") {
                continue;
            }
            match self.read_entry(&entry.path(), &filename).await {
                Ok(listed) => entries.push(listed),
                Err(err) => {
                    warn!(file = %filename, error = %err, "unreadable snapshot file skipped");
                }
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Delete all but the `keep` newest snapshots.
    pub async fn cleanup(&self, keep: usize) -> BackupResult<CleanupOutcome> {
        let entries = self.list().await?;
        if entries.len() <= keep {
            return Ok(CleanupOutcome {
                deleted: 0,
                kept: entries.len(),
            });
        }

        let mut deleted = 0;
        for entry in &entries[keep..] {
            match fs::remove_file(&entry.path).await {
                Ok(()) => {
                    deleted += 1;
                    info!(file = %entry.filename, "old snapshot deleted");
                }
                Err(err) => {
                    warn!(file = %entry.filename, error = %err, "failed to delete snapshot");
                }
            }
        }

        Ok(CleanupOutcome { deleted, kept: keep })
    }

    async fn read_entry(&self, path: &Path, filename: &str) -> BackupResult<SnapshotEntry> {
        let metadata = fs::metadata(path).await.map_err(BackupError::filesystem)?;
        let content = fs::read(path).await.map_err(BackupError::filesystem)?;
        let snapshot: Snapshot = serde_json::from_slice(&content)?;
        let valid = self.validator.validate(&snapshot).valid;

        Ok(SnapshotEntry {
            filename: filename.to_string(),
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            id: snapshot.id,
            version: snapshot.version,
            created_at: snapshot.created_at,
            created_by: snapshot.created_by,
            valid,
        })
    }
}

/// `backup_<timestamp>_<id>.json`, with `:` and `.` in the timestamp
/// replaced by dashes so the name is safe on any filesystem.
pub fn snapshot_filename(snapshot: &Snapshot) -> String {
    let stamp = snapshot
        .created_at
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
        .replace([':', '.'], "-");
    format!("backup_{stamp}_{}.json", snapshot.id)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use backup_core::JsonMap;

    fn sample_snapshot(id: &str, minute: u32) -> Snapshot {
        let mut data = JsonMap::new();
        data.insert(
            "appliances".to_string(),
            json!([{"id": 1, "name": "svc", "url": "http://x"}]),
        );
        data.insert("categories".to_string(), json!([]));
        data.insert("users".to_string(), json!([]));
        let checksum = backup_core::checksum(&data).unwrap();

        Snapshot {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            created_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap()),
            created_by: "tester".to_string(),
            system_info: Default::default(),
            checksum,
            metadata: None,
            data,
        }
    }

    #[test]
    fn filename_replaces_colons_and_dots() {
        let snapshot = sample_snapshot("aabbccdd", 30);
        let filename = snapshot_filename(&snapshot);
        assert_eq!(filename, "backup_2025-06-01T12-30-00-000Z_aabbccdd.json");
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let snapshot = sample_snapshot("aabbccdd", 0);

        let saved = store.save(&snapshot).await.unwrap();
        let loaded = store.load(&saved.filename).await.unwrap();

        assert_eq!(loaded.id, snapshot.id);
        assert_eq!(loaded.checksum, snapshot.checksum);
        assert_eq!(loaded.data, snapshot.data);
    }

    #[tokio::test]
    async fn load_rejects_path_components() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let err = store.load("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_flags_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        store.save(&sample_snapshot("older000", 1)).await.unwrap();
        let mut tampered = sample_snapshot("newer000", 2);
        tampered.checksum = "0".repeat(64);
        store.save(&tampered).await.unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "newer000");
        assert!(!entries[0].valid);
        assert!(entries[1].valid);
    }

    #[tokio::test]
    async fn cleanup_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        for (index, id) in ["aa", "bb", "cc", "dd"].iter().enumerate() {
            store
                .save(&sample_snapshot(id, index as u32))
                .await
                .unwrap();
        }

        let outcome = store.cleanup(2).await.unwrap();
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.kept, 2);

        let remaining = store.list().await.unwrap();
        let ids: Vec<_> = remaining.iter().map(|e| e.id.as_str()).collect();
        // The two newest by creation time survive.
        assert_eq!(ids, vec!["dd", "cc"]);
    }
}
