//! backup-core - Data model, validation and shared seams for the appliance
//! dashboard backup subsystem.
//!
//! This crate provides the pieces every other backup crate builds on:
//!
//! - `models` - the snapshot document and the result/report types
//! - `validator` - pure structural/semantic checks over a snapshot
//! - `checksum` - canonical content checksums for the snapshot payload
//! - `error` - the shared error taxonomy
//! - `collab` - traits for external collaborators (audit log, broadcast)
//!
//! Nothing in here performs I/O; the builder, orchestrator, adapter and
//! reconciler crates layer the side effects on top.

pub mod checksum;
pub mod collab;
pub mod config;
pub mod error;
pub mod models;
pub mod record;
pub mod validator;

pub use checksum::checksum;
pub use collab::{AuditSink, EventBroadcast};
pub use config::BackupPaths;
pub use error::{BackupError, BackupResult};
pub use models::*;
pub use validator::{statistics, Validator};
