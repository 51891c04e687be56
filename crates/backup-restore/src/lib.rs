//! backup-restore - Transactional snapshot restore
//!
//! Re-applies a snapshot to a live system: one transaction wraps the
//! destructive table-by-table replay against the primary store, while
//! filesystem payloads (secret key files, attachments, generated
//! configs) and the external connection store are reconciled around it.
//!
//! The restore is single-flight by convention: one pooled connection,
//! one transaction, sequential table processing. Two deliberate gaps are
//! documented on [`RestoreOrchestrator`]: filesystem writes are not
//! rolled back with the transaction, and the external store is not
//! transactionally coupled to the primary one.

pub mod fsops;
pub mod log;
pub mod orchestrator;
pub mod tables;

pub use log::RestoreLog;
pub use orchestrator::RestoreOrchestrator;
pub use tables::HostIdMap;
