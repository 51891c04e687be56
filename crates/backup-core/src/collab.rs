//! Collaborator seams
//!
//! The backup subsystem reports into an audit log and a pub/sub broadcast
//! after snapshot creation and after restore. Both live outside this
//! workspace; only the traits are defined here. Implementations must
//! swallow their own failures - the backup core never propagates them.

use async_trait::async_trait;
use serde_json::Value;

/// Audit-log sink invoked with structured metadata
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, action: &str, metadata: Value);
}

/// Pub/sub event broadcast
#[async_trait]
pub trait EventBroadcast: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value);
}
