//! Reconciler configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Deployment-level env file
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
    /// Backend service env file
    #[serde(default = "default_backend_env_file")]
    pub backend_env_file: PathBuf,
    /// Directory recovery points are created under
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: PathBuf,
    /// Health endpoint polled for readiness and verification
    #[serde(default = "default_health_url")]
    pub health_url: String,
    /// A missing variable is inserted right after the first line
    /// containing one of these keys, keeping related secrets together
    #[serde(default = "default_anchor_keys")]
    pub anchor_keys: Vec<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            env_file: default_env_file(),
            backend_env_file: default_backend_env_file(),
            recovery_dir: default_recovery_dir(),
            health_url: default_health_url(),
            anchor_keys: default_anchor_keys(),
        }
    }
}

impl EnvConfig {
    /// Managed env files with the names their recovery copies get.
    pub fn env_files(&self) -> [(&Path, &'static str); 2] {
        [
            (self.env_file.as_path(), "env.backup"),
            (self.backend_env_file.as_path(), "backend.env.backup"),
        ]
    }
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_backend_env_file() -> PathBuf {
    PathBuf::from("backend/.env")
}

fn default_recovery_dir() -> PathBuf {
    PathBuf::from("recovery")
}

fn default_health_url() -> String {
    "http://localhost:3001/api/health".to_string()
}

fn default_anchor_keys() -> Vec<String> {
    vec![
        "JWT_SECRET".to_string(),
        "SSH_KEY_ENCRYPTION_SECRET".to_string(),
    ]
}
