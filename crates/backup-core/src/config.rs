//! Filesystem path configuration
//!
//! Every component takes its paths from an explicit [`BackupPaths`] value
//! injected at construction. There are no module-level path constants and
//! no environment lookups buried in the call sites.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Filesystem locations the backup subsystem reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPaths {
    /// Directory snapshot documents are written to
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    /// Directory holding per-secret key file pairs (owner-only access)
    #[serde(default = "default_ssh_dir")]
    pub ssh_dir: PathBuf,
    /// Directory holding decoded attachment files
    #[serde(default = "default_attachments_dir")]
    pub attachments_dir: PathBuf,
    /// Backend env file; collected sanitized, never restored
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
    /// SSH client config, regenerated from restored hosts and key files
    #[serde(default = "default_ssh_config_file")]
    pub ssh_config_file: PathBuf,
    /// Reverse-proxy config; collected, never restored
    #[serde(default = "default_proxy_config_file")]
    pub proxy_config_file: PathBuf,
    /// Version marker file
    #[serde(default = "default_version_file")]
    pub version_file: PathBuf,
    /// Hook script executed after restore when present
    #[serde(default = "default_hook_script")]
    pub hook_script: PathBuf,
}

impl Default for BackupPaths {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            ssh_dir: default_ssh_dir(),
            attachments_dir: default_attachments_dir(),
            env_file: default_env_file(),
            ssh_config_file: default_ssh_config_file(),
            proxy_config_file: default_proxy_config_file(),
            version_file: default_version_file(),
            hook_script: default_hook_script(),
        }
    }
}

impl BackupPaths {
    /// All locations placed under one base directory. Used by tests and
    /// by container deployments that mount a single state volume.
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            backup_dir: base.join("backups"),
            ssh_dir: base.join("ssh"),
            attachments_dir: base.join("uploads/backgrounds"),
            env_file: base.join(".env"),
            ssh_config_file: base.join("ssh/config"),
            proxy_config_file: base.join("nginx/default.conf"),
            version_file: base.join("VERSION"),
            hook_script: base.join("post-restore-hook.sh"),
        }
    }

    /// Private key file for a secret name.
    pub fn private_key_file(&self, key_name: &str) -> PathBuf {
        self.ssh_dir.join(format!("id_rsa_{key_name}"))
    }

    /// Public key file for a secret name.
    pub fn public_key_file(&self, key_name: &str) -> PathBuf {
        self.ssh_dir.join(format!("id_rsa_{key_name}.pub"))
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_ssh_dir() -> PathBuf {
    PathBuf::from("/root/.ssh")
}

fn default_attachments_dir() -> PathBuf {
    PathBuf::from("uploads/backgrounds")
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_ssh_config_file() -> PathBuf {
    PathBuf::from("/root/.ssh/config")
}

fn default_proxy_config_file() -> PathBuf {
    PathBuf::from("nginx/default.conf")
}

fn default_version_file() -> PathBuf {
    PathBuf::from("VERSION")
}

fn default_hook_script() -> PathBuf {
    PathBuf::from("post-restore-hook.sh")
}
