//! Shared error taxonomy for the backup subsystem

use thiserror::Error;

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Errors that can occur while building, validating or restoring snapshots
#[derive(Debug, Error)]
pub enum BackupError {
    /// Structural validation failed; blocks snapshot persistence and
    /// blocks restore unless forced. Carries the aggregated error list.
    #[error("snapshot validation failed: {0}")]
    Validation(String),

    /// Stored checksum does not match the recomputed one - a corruption
    /// or tamper signal, always hard.
    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,

    /// Primary relational store failure outside the per-record tolerance
    #[error("store error: {0}")]
    Store(String),

    /// Failure in a destructive restore step (delete, identity reset,
    /// constraint toggle); aborts and rolls back the whole restore
    #[error("transaction failed during {phase}: {message}")]
    Transaction { phase: String, message: String },

    /// Filesystem read/write failure outside the per-record tolerance
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// External connection-store failure. Unreachability is never mapped
    /// here - callers treat it as a skip.
    #[error("external connection store error: {0}")]
    External(String),

    /// Snapshot document could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Named snapshot file does not exist in the backup directory
    #[error("snapshot not found: {0}")]
    NotFound(String),
}

impl BackupError {
    /// Wrap a relational-store error
    pub fn store(err: impl std::fmt::Display) -> Self {
        BackupError::Store(err.to_string())
    }

    /// Wrap a filesystem error
    pub fn filesystem(err: impl std::fmt::Display) -> Self {
        BackupError::Filesystem(err.to_string())
    }

    /// Wrap an external connection-store error
    pub fn external(err: impl std::fmt::Display) -> Self {
        BackupError::External(err.to_string())
    }

    /// Wrap a fatal transaction-phase error
    pub fn transaction(phase: impl Into<String>, err: impl std::fmt::Display) -> Self {
        BackupError::Transaction {
            phase: phase.into(),
            message: err.to_string(),
        }
    }
}
