//! Data models for the sync engine

mod queue_item;
mod record;

pub use queue_item::{Operation, QueueItem, QueueStatus};
pub use record::{CachedRecord, RecordId, Table};
