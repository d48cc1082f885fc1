//! Ports to the authoritative remote store and its change feed

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{Operation, RecordId, Table};

/// Failures at the remote-store boundary.
///
/// The engine aborts the rest of a drain on `Unauthorized`; `Transient` and
/// `Rejected` both go through retry bookkeeping and share the dead-letter
/// cap, so a validation rejection is retained rather than silently dropped.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network error, 5xx, or timeout; worth retrying
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The remote store rejected the operation (e.g. validation)
    #[error("remote store rejected operation: {0}")]
    Rejected(String),

    /// Session expired or missing; drain must wait for a fresh session
    #[error("remote call unauthorized")]
    Unauthorized,
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Client for the authoritative remote data store.
///
/// Timeouts are the client's concern; the engine imposes none of its own.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a full record; must accept client-generated ids
    async fn insert(&self, table: Table, record: &Value) -> RemoteResult<()>;

    /// Apply a full or partial record by id
    async fn update(&self, table: Table, id: &RecordId, patch: &Value) -> RemoteResult<()>;

    /// Delete a record by id
    async fn delete(&self, table: Table, id: &RecordId) -> RemoteResult<()>;

    /// Mint a time-limited access URL for an object in remote storage
    async fn create_temporary_access_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_secs: i64,
    ) -> RemoteResult<String>;
}

/// A change notification from the remote store.
///
/// Carried for logging only; the reconciler never applies deltas directly
/// (server-side computed fields would diverge) and instead triggers a
/// debounced refetch.
#[derive(Debug, Clone)]
pub struct RemoteChange {
    pub table: Table,
    pub operation: Option<Operation>,
    pub record_id: Option<RecordId>,
}

/// Port for per-table realtime change subscriptions.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start streaming change notifications for one table.
    ///
    /// Dropping the receiver ends the subscription.
    async fn subscribe_to_changes(
        &self,
        table: Table,
    ) -> RemoteResult<mpsc::UnboundedReceiver<RemoteChange>>;
}
