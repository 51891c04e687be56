//! backup-snapshot - Snapshot assembly and persistence
//!
//! The builder collects every configured domain table from the primary
//! relational store, enriches secret-bearing and attachment records with
//! their filesystem payloads, inlines sanitized config files, asks the
//! Guacamole adapter for connection definitions when the external store
//! is reachable, computes the content checksum, validates, and persists
//! the result as one JSON document in the backup directory.
//!
//! Collection is deliberately forgiving: a failing table degrades to an
//! empty set, a missing key file becomes a per-record marker, an
//! unreachable external store is recorded as an empty export. Only a
//! structural validation failure aborts snapshot creation - in that case
//! no file is written.
//!
//! The file store side handles listing, loading and retention cleanup of
//! previously written snapshots.

pub mod builder;
pub mod collect;
pub mod enrich;
pub mod report;
pub mod sanitize;
pub mod store;
pub mod sysinfo;

pub use builder::SnapshotBuilder;
pub use report::{DataSummary, SnapshotOutcome};
pub use sanitize::EnvSanitizer;
pub use store::{CleanupOutcome, SnapshotEntry, SnapshotStore};
