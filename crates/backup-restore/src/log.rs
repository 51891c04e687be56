//! Chronological restore log
//!
//! Every restore accumulates a full log that is returned in the result
//! regardless of outcome, so callers can audit exactly what happened
//! even on a "successful" restore that contains warnings or per-record
//! errors. Entries are mirrored to tracing as they are recorded.

use chrono::Utc;
use tracing::{error, info, warn};

use backup_core::{LogLevel, RestoreLogEntry};

/// Accumulating restore log
#[derive(Debug, Default)]
pub struct RestoreLog {
    entries: Vec<RestoreLogEntry>,
}

impl RestoreLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn entries(&self) -> &[RestoreLogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RestoreLogEntry> {
        self.entries
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        self.entries.push(RestoreLogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }
}
