//! Filesystem side of restore
//!
//! Secret key files land in an owner-only directory, attachments are
//! decoded into their directory after it is cleared, and the ssh client
//! config is regenerated from the restored host list.
//!
//! None of this is covered by the relational transaction: a crash
//! between a filesystem write and the final commit leaves filesystem
//! state ahead of a possibly rolled-back database.

use std::path::Path;

use tokio::fs;

use backup_core::{BackupError, BackupResult};

use crate::tables::HostEntry;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Owner-only directory mode for the secrets directory
pub const SECRET_DIR_MODE: u32 = 0o700;
/// Owner read/write for private keys and the ssh client config
pub const PRIVATE_KEY_MODE: u32 = 0o600;
/// World-readable for public keys
pub const PUBLIC_KEY_MODE: u32 = 0o644;

/// Create the secrets directory with owner-only access.
pub async fn prepare_secret_dir(dir: &Path) -> BackupResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(BackupError::filesystem)?;
    set_mode(dir, SECRET_DIR_MODE).await
}

/// Write owner-only text (private keys, ssh client config).
pub async fn write_owner_only(path: &Path, content: &str) -> BackupResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackupError::filesystem)?;
    }
    fs::write(path, content)
        .await
        .map_err(BackupError::filesystem)?;
    set_mode(path, PRIVATE_KEY_MODE).await
}

/// Write a world-readable public key file.
pub async fn write_public_key(path: &Path, content: &str) -> BackupResult<()> {
    fs::write(path, content)
        .await
        .map_err(BackupError::filesystem)?;
    set_mode(path, PUBLIC_KEY_MODE).await
}

/// Write a decoded attachment payload.
pub async fn write_attachment(path: &Path, bytes: &[u8]) -> BackupResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackupError::filesystem)?;
    }
    fs::write(path, bytes).await.map_err(BackupError::filesystem)
}

/// Remove every file in a directory, creating the directory when absent.
pub async fn clear_dir(dir: &Path) -> BackupResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(BackupError::filesystem)?;
    let mut entries = fs::read_dir(dir).await.map_err(BackupError::filesystem)?;
    while let Some(entry) = entries.next_entry().await.map_err(BackupError::filesystem)? {
        let is_file = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        if is_file {
            fs::remove_file(entry.path())
                .await
                .map_err(BackupError::filesystem)?;
        }
    }
    Ok(())
}

/// Re-apply the expected modes across the secrets directory: the
/// directory itself owner-only, private keys and the config owner
/// read/write, public keys world-readable.
pub async fn fix_secret_permissions(dir: &Path) -> BackupResult<()> {
    set_mode(dir, SECRET_DIR_MODE).await?;

    let mut entries = fs::read_dir(dir).await.map_err(BackupError::filesystem)?;
    while let Some(entry) = entries.next_entry().await.map_err(BackupError::filesystem)? {
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if name.ends_with(".pub") {
            set_mode(&path, PUBLIC_KEY_MODE).await?;
        } else if name.starts_with("id_") || name == "config" {
            set_mode(&path, PRIVATE_KEY_MODE).await?;
        }
    }
    Ok(())
}

/// Regenerate the ssh client config from the restored host list, pairing
/// each active host with its key file.
pub async fn write_ssh_client_config(
    path: &Path,
    hosts: &[HostEntry],
    ssh_dir: &Path,
) -> BackupResult<()> {
    let mut config = String::new();
    for host in hosts.iter().filter(|host| host.is_active) {
        let identity = ssh_dir.join(format!("id_rsa_{}", host.key_name));
        config.push_str(&format!(
            "Host {}\n    HostName {}\n    User {}\n    Port {}\n    IdentityFile {}\n    IdentitiesOnly yes\n    StrictHostKeyChecking no\n\n",
            host.hostname,
            host.host,
            host.username,
            host.port,
            identity.display(),
        ));
    }
    write_owner_only(path, &config).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> BackupResult<()> {
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(BackupError::filesystem)
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> BackupResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn ssh_config_pairs_hosts_with_key_files() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config");
        let hosts = vec![
            HostEntry {
                hostname: "web".to_string(),
                host: "10.0.0.5".to_string(),
                username: "root".to_string(),
                port: 22,
                key_name: "dashboard".to_string(),
                is_active: true,
            },
            HostEntry {
                hostname: "old".to_string(),
                host: "10.0.0.9".to_string(),
                username: "root".to_string(),
                port: 22,
                key_name: "dashboard".to_string(),
                is_active: false,
            },
        ];

        write_ssh_client_config(&config_path, &hosts, Path::new("/root/.ssh"))
            .await
            .unwrap();

        let content = fs::read_to_string(&config_path).await.unwrap();
        assert!(content.contains("Host web"));
        assert!(content.contains("HostName 10.0.0.5"));
        assert!(content.contains("IdentityFile /root/.ssh/id_rsa_dashboard"));
        // Inactive hosts stay out of the generated config.
        assert!(!content.contains("Host old"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn secret_permissions_are_applied() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let ssh_dir = dir.path().join("ssh");
        prepare_secret_dir(&ssh_dir).await.unwrap();
        write_owner_only(&ssh_dir.join("id_rsa_test"), "PRIVATE")
            .await
            .unwrap();
        write_public_key(&ssh_dir.join("id_rsa_test.pub"), "PUBLIC")
            .await
            .unwrap();

        fix_secret_permissions(&ssh_dir).await.unwrap();

        let dir_mode = fs::metadata(&ssh_dir).await.unwrap().mode() & 0o777;
        let private_mode = fs::metadata(ssh_dir.join("id_rsa_test")).await.unwrap().mode() & 0o777;
        let public_mode = fs::metadata(ssh_dir.join("id_rsa_test.pub")).await.unwrap().mode() & 0o777;
        assert_eq!(dir_mode, SECRET_DIR_MODE);
        assert_eq!(private_mode, PRIVATE_KEY_MODE);
        assert_eq!(public_mode, PUBLIC_KEY_MODE);
    }
}
