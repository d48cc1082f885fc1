//! Replicated record model shared by all cached collections

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

/// A replicated collection mirrored in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Notes,
    Photos,
    Files,
    Albums,
}

impl Table {
    /// All replicated collections, in a stable order.
    pub const ALL: [Self; 4] = [Self::Notes, Self::Photos, Self::Files, Self::Albums];

    /// Wire/storage name of the collection.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::Photos => "photos",
            Self::Files => "files",
            Self::Albums => "albums",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notes" => Ok(Self::Notes),
            "photos" => Ok(Self::Photos),
            "files" => Ok(Self::Files),
            "albums" => Ok(Self::Albums),
            other => Err(Error::InvalidInput(format!("Unknown table: {other}"))),
        }
    }
}

/// A unique identifier for a replicated record.
///
/// Records created offline mint a UUID v7 (time-sortable) that stays the
/// permanent id after the first successful remote insert, so queued items
/// never need id remapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Mint a new client-side id using UUID v7.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The locally cached copy of one remote record.
///
/// The entity-specific fields live inside `payload` as an opaque JSON
/// document; only the fields needed for replication are lifted out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRecord {
    /// Unique identifier within its table
    pub id: RecordId,
    /// Full record document as last fetched or locally written
    pub payload: Value,
    /// Last local write timestamp (Unix ms)
    pub updated_at: i64,
    /// True iff the local value is known to match the remote value
    pub synced: bool,
}

impl CachedRecord {
    /// Build a record from a JSON document, reading its `"id"` field.
    ///
    /// Documents without an id (records created offline) get a freshly
    /// minted UUID v7 injected back into the payload.
    pub fn from_payload(mut payload: Value, synced: bool) -> crate::Result<Self> {
        if !payload.is_object() {
            return Err(Error::InvalidInput(
                "record payload must be a JSON object".to_string(),
            ));
        }

        let id = match payload.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => RecordId::from(id),
            _ => {
                let id = RecordId::generate();
                if let Some(object) = payload.as_object_mut() {
                    object.insert("id".to_string(), Value::String(id.as_str().to_string()));
                }
                id
            }
        };

        Ok(Self {
            id,
            payload,
            updated_at: chrono::Utc::now().timestamp_millis(),
            synced,
        })
    }
}
