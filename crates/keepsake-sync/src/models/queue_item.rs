//! Pending mutation model for the durable queue

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::models::Table;

/// A write intent against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Wire/storage name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown operation: {other}"))),
        }
    }
}

/// Replay state of a queued mutation.
///
/// `Failed` is terminal: the item crossed the retry cap and is kept as a
/// dead letter for operator inspection instead of blocking later items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Failed,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("Unknown queue status: {other}"))),
        }
    }
}

/// One durable entry in the mutation queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Auto-incrementing sequence number; replay order is ascending id
    pub id: i64,
    /// Target collection
    pub table: Table,
    /// Write intent
    pub operation: Operation,
    /// Data needed to replay the operation (at least the record id)
    pub payload: Value,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
    /// Remote attempts that have failed so far
    pub retries: u32,
    /// Most recent failure message, if any
    pub last_error: Option<String>,
    /// Pending or dead-lettered
    pub status: QueueStatus,
}

impl QueueItem {
    /// Record id named by this mutation's payload, when present.
    ///
    /// `Insert`/`Update` payloads carry the full document; `Delete` payloads
    /// carry at least `{"id": ...}`.
    #[must_use]
    pub fn record_id(&self) -> Option<crate::models::RecordId> {
        self.payload
            .get("id")
            .and_then(Value::as_str)
            .map(crate::models::RecordId::from)
    }
}
