//! Host environment capture

use std::path::Path;

use chrono::Utc;
use tokio::fs;

use backup_core::{MemoryInfo, SystemInfo};

/// Describe the environment a snapshot is taken in.
pub async fn system_info() -> SystemInfo {
    SystemInfo {
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        memory: memory_info().await,
        container: Path::new("/.dockerenv").exists(),
        backup_timestamp: Some(Utc::now()),
    }
}

/// Application version from the configured marker file, falling back to
/// the crate version when the file is absent.
pub async fn system_version(version_file: &Path) -> String {
    match fs::read_to_string(version_file).await {
        Ok(content) => content.trim().to_string(),
        Err(_) => env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Memory totals from /proc/meminfo; zeros on platforms without it.
async fn memory_info() -> MemoryInfo {
    let Ok(content) = fs::read_to_string("/proc/meminfo").await else {
        return MemoryInfo::default();
    };

    let mut info = MemoryInfo::default();
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            info.total_mb = parse_kb(rest) / 1024;
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            info.free_mb = parse_kb(rest) / 1024;
        }
    }
    info
}

fn parse_kb(rest: &str) -> u64 {
    rest.split_whitespace()
        .next()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kb_values_parse_with_unit_suffix() {
        assert_eq!(parse_kb("  16384256 kB"), 16384256);
        assert_eq!(parse_kb("garbage"), 0);
    }

    #[tokio::test]
    async fn version_falls_back_to_crate_version() {
        let version = system_version(Path::new("/nonexistent/VERSION")).await;
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
    }
}
