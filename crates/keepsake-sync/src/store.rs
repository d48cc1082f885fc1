//! Local store: the last-known-good mirror of fetched remote data

use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{CachedRecord, RecordId, Table};

/// Trait for local mirror storage operations (async)
///
/// The mirror is a full copy of whatever subset of remote data the user has
/// fetched, not an LRU cache; callers bound what they fetch.
#[allow(async_fn_in_trait)]
pub trait LocalStore {
    /// Get all cached records for a collection, most recently written first
    async fn get(&self, table: Table) -> Result<Vec<CachedRecord>>;

    /// Idempotent upsert by id; last writer wins per record
    async fn put(&self, table: Table, records: &[CachedRecord]) -> Result<()>;

    /// Flip a record's synced marker after a confirmed remote write
    async fn mark_synced(&self, table: Table, id: &RecordId) -> Result<()>;

    /// Remove one record (confirmed remote delete)
    async fn remove(&self, table: Table, id: &RecordId) -> Result<()>;

    /// Drop all cached records for one collection
    async fn clear(&self, table: Table) -> Result<()>;

    /// Drop the whole mirror (logout)
    async fn clear_all(&self) -> Result<()>;
}

/// libSQL implementation of `LocalStore`
pub struct LibSqlLocalStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlLocalStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(id: String, payload: &str, updated_at: i64, synced: bool) -> Result<CachedRecord> {
        Ok(CachedRecord {
            id: RecordId::from(id),
            payload: serde_json::from_str(payload)?,
            updated_at,
            synced,
        })
    }
}

impl LocalStore for LibSqlLocalStore<'_> {
    async fn get(&self, table: Table) -> Result<Vec<CachedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, payload, updated_at, synced
                 FROM cached_records
                 WHERE table_name = ?
                 ORDER BY updated_at DESC",
                params![table.as_str()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let payload: String = row.get(1)?;
            let updated_at: i64 = row.get(2)?;
            let synced = row.get::<i32>(3)? != 0;
            records.push(Self::parse_record(id, &payload, updated_at, synced)?);
        }

        Ok(records)
    }

    async fn put(&self, table: Table, records: &[CachedRecord]) -> Result<()> {
        for record in records {
            let payload = serde_json::to_string(&record.payload)?;
            self.conn
                .execute(
                    "INSERT INTO cached_records (table_name, id, payload, updated_at, synced)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT (table_name, id) DO UPDATE SET
                         payload = excluded.payload,
                         updated_at = excluded.updated_at,
                         synced = excluded.synced",
                    params![
                        table.as_str(),
                        record.id.as_str(),
                        payload,
                        record.updated_at,
                        i32::from(record.synced)
                    ],
                )
                .await?;
        }

        Ok(())
    }

    async fn mark_synced(&self, table: Table, id: &RecordId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE cached_records SET synced = 1 WHERE table_name = ? AND id = ?",
                params![table.as_str(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, table: Table, id: &RecordId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM cached_records WHERE table_name = ? AND id = ?",
                params![table.as_str(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn clear(&self, table: Table) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM cached_records WHERE table_name = ?",
                params![table.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.conn.execute("DELETE FROM cached_records", ()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn record(id: &str, title: &str, synced: bool) -> CachedRecord {
        CachedRecord::from_payload(json!({"id": id, "title": title}), synced).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        store
            .put(Table::Notes, &[record("n1", "a", true)])
            .await
            .unwrap();

        let records = store.get(Table::Notes).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_str(), "n1");
        assert!(records[0].synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_is_idempotent() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        let r = record("n1", "a", true);
        store.put(Table::Notes, &[r.clone()]).await.unwrap();
        let once = store.get(Table::Notes).await.unwrap();

        store.put(Table::Notes, &[r]).await.unwrap();
        let twice = store.get(Table::Notes).await.unwrap();

        assert_eq!(once, twice);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_last_writer_wins_per_id() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        store
            .put(Table::Notes, &[record("n1", "first", true)])
            .await
            .unwrap();
        store
            .put(Table::Notes, &[record("n1", "second", false)])
            .await
            .unwrap();

        let records = store.get(Table::Notes).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["title"], "second");
        assert!(!records[0].synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tables_are_isolated() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        store
            .put(Table::Notes, &[record("x", "note", true)])
            .await
            .unwrap();
        store
            .put(Table::Photos, &[record("x", "photo", true)])
            .await
            .unwrap();

        store.clear(Table::Notes).await.unwrap();

        assert!(store.get(Table::Notes).await.unwrap().is_empty());
        assert_eq!(store.get(Table::Photos).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_synced_and_remove() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        store
            .put(Table::Files, &[record("f1", "draft", false)])
            .await
            .unwrap();

        store
            .mark_synced(Table::Files, &RecordId::from("f1"))
            .await
            .unwrap();
        assert!(store.get(Table::Files).await.unwrap()[0].synced);

        store
            .remove(Table::Files, &RecordId::from("f1"))
            .await
            .unwrap();
        assert!(store.get(Table::Files).await.unwrap().is_empty());

        // Removing an absent record is a no-op
        store
            .remove(Table::Files, &RecordId::from("f1"))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_all() {
        let db = setup().await;
        let store = LibSqlLocalStore::new(db.connection());

        store
            .put(Table::Notes, &[record("n1", "a", true)])
            .await
            .unwrap();
        store
            .put(Table::Albums, &[record("a1", "b", true)])
            .await
            .unwrap();

        store.clear_all().await.unwrap();

        for table in Table::ALL {
            assert!(store.get(table).await.unwrap().is_empty());
        }
    }
}
