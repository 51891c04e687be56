//! Content checksums over the snapshot payload

use sha2::{Digest, Sha256};

use crate::error::BackupResult;
use crate::models::JsonMap;

/// Compute the SHA-256 checksum of `data` in canonical form.
///
/// Canonical form is compact JSON with sorted keys. [`JsonMap`] (and every
/// nested object inside a `serde_json::Value`) is BTree-backed, so plain
/// serialization is already canonical and the hex digest is reproducible
/// across independently written builders and validators.
pub fn checksum(data: &JsonMap) -> BackupResult<String> {
    let canonical = serde_json::to_vec(data)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
