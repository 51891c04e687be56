//! Validation and restore result types
//!
//! All of these are computed on demand and returned to the caller; the
//! core never persists them. Persistence, if any, happens through the
//! caller's audit-log collaborator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of validating a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// False when at least one hard error was found
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub statistics: SnapshotStatistics,
}

impl ValidationReport {
    /// All hard errors joined into one descriptive line.
    pub fn error_summary(&self) -> String {
        self.errors.join(", ")
    }
}

/// Informational sizes and counts, used in reports only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStatistics {
    pub version: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Serialized size of the whole document in bytes
    pub total_size: usize,
    pub tables: BTreeMap<String, TableStats>,
}

/// Per-table record count and serialized byte size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub count: usize,
    pub size: usize,
}

/// Per-table restore outcome.
///
/// Models the two-tier error policy explicitly: per-record insert
/// failures degrade a table to `Partial`, while a failure in the
/// destructive delete/reset step is `Fatal` and rolls back the whole
/// restore transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    /// Every record applied
    Ok { restored: usize },
    /// Applied, with per-record failures counted
    Partial { restored: usize, errors: usize },
    /// Nothing to do: table absent from the snapshot, or the external
    /// store was unreachable
    Skipped,
    /// Destructive phase failed; the transaction was rolled back
    Fatal { error: String },
}

impl TableOutcome {
    /// Collapse raw counters into `Ok` or `Partial`.
    pub fn from_counts(restored: usize, errors: usize) -> Self {
        if errors == 0 {
            TableOutcome::Ok { restored }
        } else {
            TableOutcome::Partial { restored, errors }
        }
    }

    pub fn restored(&self) -> usize {
        match self {
            TableOutcome::Ok { restored } | TableOutcome::Partial { restored, .. } => *restored,
            _ => 0,
        }
    }

    pub fn errors(&self) -> usize {
        match self {
            TableOutcome::Partial { errors, .. } => *errors,
            TableOutcome::Fatal { .. } => 1,
            _ => 0,
        }
    }
}

/// Severity of a restore log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => f.write_str("info"),
            LogLevel::Warn => f.write_str("warn"),
            LogLevel::Error => f.write_str("error"),
        }
    }
}

/// One chronological entry of the restore log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Result of one restore invocation.
///
/// Returned regardless of warnings or per-record errors - a restore
/// "succeeds" once the transaction commits, and callers inspect the
/// per-table outcomes and the log to judge true completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    pub results: BTreeMap<String, TableOutcome>,
    pub log: Vec<RestoreLogEntry>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Options accepted by the restore orchestrator
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Proceed even when validation reports hard errors
    pub force: bool,
    /// Snapshot the current state before overwriting it
    pub backup_current: bool,
}

/// Post-restore count verification, informational only
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub tables: BTreeMap<String, TableCountCheck>,
    pub issues: Vec<String>,
}

/// Expected vs. observed record count for one table
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TableCountCheck {
    pub expected: i64,
    pub actual: i64,
    pub matched: bool,
}
