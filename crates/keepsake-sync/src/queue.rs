//! Durable FIFO queue of pending write intents

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::{Operation, QueueItem, QueueStatus, Table};

/// Trait for mutation queue operations (async)
///
/// Ordering is global FIFO across all collections, not per-entity: a burst
/// of mutations replays strictly in arrival order.
#[allow(async_fn_in_trait)]
pub trait MutationQueue {
    /// Append a write intent; the row is durable before this returns
    async fn enqueue(&self, table: Table, operation: Operation, payload: serde_json::Value)
        -> Result<QueueItem>;

    /// All pending items in ascending id order (dead letters excluded)
    async fn peek_all(&self) -> Result<Vec<QueueItem>>;

    /// Remove an item after its remote operation succeeded
    async fn remove(&self, id: i64) -> Result<()>;

    /// Record a failed replay attempt; flips to `Failed` at the retry cap
    async fn mark_failed(&self, id: i64, error: &str, retry_cap: u32) -> Result<QueueStatus>;

    /// Number of items still awaiting replay
    async fn pending_count(&self) -> Result<u64>;

    /// Dead-lettered items retained for operator inspection
    async fn failed(&self) -> Result<Vec<QueueItem>>;

    /// Drop everything, dead letters included (logout)
    async fn clear_all(&self) -> Result<()>;
}

/// libSQL implementation of `MutationQueue`
pub struct LibSqlMutationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMutationQueue<'a> {
    /// Create a new queue with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row) -> Result<QueueItem> {
        let table: String = row.get(1)?;
        let operation: String = row.get(2)?;
        let payload: String = row.get(3)?;
        let status: String = row.get(7)?;

        Ok(QueueItem {
            id: row.get(0)?,
            table: table.parse()?,
            operation: operation.parse()?,
            payload: serde_json::from_str(&payload)?,
            created_at: row.get(4)?,
            retries: u32::try_from(row.get::<i64>(5)?).unwrap_or(u32::MAX),
            last_error: row.get(6)?,
            status: status.parse()?,
        })
    }

    async fn list_by_status(&self, status: QueueStatus) -> Result<Vec<QueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, table_name, operation, payload, created_at, retries, last_error, status
                 FROM mutation_queue
                 WHERE status = ?
                 ORDER BY id ASC",
                params![status.as_str()],
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }

        Ok(items)
    }

    async fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, table_name, operation, payload, created_at, retries, last_error, status
                 FROM mutation_queue
                 WHERE id = ?",
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_item(&row)?)),
            None => Ok(None),
        }
    }
}

impl MutationQueue for LibSqlMutationQueue<'_> {
    async fn enqueue(
        &self,
        table: Table,
        operation: Operation,
        payload: serde_json::Value,
    ) -> Result<QueueItem> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let payload_text = serde_json::to_string(&payload)?;

        self.conn
            .execute(
                "INSERT INTO mutation_queue (table_name, operation, payload, created_at, status)
                 VALUES (?, ?, ?, ?, 'pending')",
                params![table.as_str(), operation.as_str(), payload_text, created_at],
            )
            .await?;

        let id = self.conn.last_insert_rowid();
        tracing::debug!(table = %table, operation = %operation, id, "Enqueued mutation");

        Ok(QueueItem {
            id,
            table,
            operation,
            payload,
            created_at,
            retries: 0,
            last_error: None,
            status: QueueStatus::Pending,
        })
    }

    async fn peek_all(&self) -> Result<Vec<QueueItem>> {
        self.list_by_status(QueueStatus::Pending).await
    }

    async fn remove(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM mutation_queue WHERE id = ?", params![id])
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str, retry_cap: u32) -> Result<QueueStatus> {
        self.conn
            .execute(
                "UPDATE mutation_queue SET retries = retries + 1, last_error = ? WHERE id = ?",
                params![error, id],
            )
            .await?;

        let Some(item) = self.get(id).await? else {
            return Err(crate::error::Error::NotFound(format!("queue item {id}")));
        };

        if item.retries < retry_cap {
            return Ok(QueueStatus::Pending);
        }

        // Cap reached: dead-letter the item so it cannot wedge the queue
        self.conn
            .execute(
                "UPDATE mutation_queue SET status = 'failed' WHERE id = ?",
                params![id],
            )
            .await?;

        tracing::warn!(
            id,
            table = %item.table,
            operation = %item.operation,
            retries = item.retries,
            error,
            "Queue item exceeded retry cap; moved to dead letter"
        );

        Ok(QueueStatus::Failed)
    }

    async fn pending_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM mutation_queue WHERE status = 'pending'",
                (),
            )
            .await?;

        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn failed(&self) -> Result<Vec<QueueItem>> {
        self.list_by_status(QueueStatus::Failed).await
    }

    async fn clear_all(&self) -> Result<()> {
        self.conn.execute("DELETE FROM mutation_queue", ()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_assigns_increasing_ids() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let first = queue
            .enqueue(Table::Notes, Operation::Insert, json!({"id": "n1"}))
            .await
            .unwrap();
        let second = queue
            .enqueue(Table::Photos, Operation::Delete, json!({"id": "p1"}))
            .await
            .unwrap();

        assert!(second.id > first.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_peek_all_is_fifo_across_tables() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        queue
            .enqueue(Table::Notes, Operation::Insert, json!({"id": "n1"}))
            .await
            .unwrap();
        queue
            .enqueue(Table::Albums, Operation::Update, json!({"id": "a1"}))
            .await
            .unwrap();
        queue
            .enqueue(Table::Notes, Operation::Delete, json!({"id": "n1"}))
            .await
            .unwrap();

        let items = queue.peek_all().await.unwrap();
        let order: Vec<_> = items
            .iter()
            .map(|item| (item.table, item.operation))
            .collect();

        assert_eq!(
            order,
            vec![
                (Table::Notes, Operation::Insert),
                (Table::Albums, Operation::Update),
                (Table::Notes, Operation::Delete),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_deletes_item() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let item = queue
            .enqueue(Table::Notes, Operation::Insert, json!({"id": "n1"}))
            .await
            .unwrap();
        queue.remove(item.id).await.unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert!(queue.peek_all().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_failed_tracks_retries_until_cap() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let item = queue
            .enqueue(Table::Files, Operation::Update, json!({"id": "f1"}))
            .await
            .unwrap();

        for attempt in 1..5 {
            let status = queue
                .mark_failed(item.id, "connection reset", 5)
                .await
                .unwrap();
            assert_eq!(status, QueueStatus::Pending, "attempt {attempt}");
        }

        let status = queue
            .mark_failed(item.id, "connection reset", 5)
            .await
            .unwrap();
        assert_eq!(status, QueueStatus::Failed);

        // Not silently dropped: retained as a dead letter with retries == 5
        let failed = queue.failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retries, 5);
        assert_eq!(failed[0].last_error.as_deref(), Some("connection reset"));

        // Dead letters no longer appear in the drain's view
        assert!(queue.peek_all().await.unwrap().is_empty());
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("keepsake.db");

        {
            let db = Database::open(&path).await.unwrap();
            let queue = LibSqlMutationQueue::new(db.connection());
            queue
                .enqueue(Table::Notes, Operation::Insert, json!({"id": "n1", "title": "a"}))
                .await
                .unwrap();
        }

        let db = Database::open(&path).await.unwrap();
        let queue = LibSqlMutationQueue::new(db.connection());
        let items = queue.peek_all().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].table, Table::Notes);
        assert_eq!(items[0].payload["title"], "a");
    }
}
