//! Sync engine: drains the mutation queue against the remote store
//!
//! The engine exclusively owns the local store and the mutation queue; all
//! writes to either pass through its public operations. At most one drain
//! executes at a time, enforced by an explicit `Idle`/`Draining` state
//! transition released by an RAII guard.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::db::Database;
use crate::error::Result;
use crate::models::{CachedRecord, Operation, QueueItem, Table};
use crate::queue::{LibSqlMutationQueue, MutationQueue};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::session::SessionProvider;
use crate::store::{LibSqlLocalStore, LocalStore};
use crate::urlcache::{SignedUrlCache, SignedUrlKey};

/// Failed remote attempts before an item is dead-lettered
pub const DEFAULT_RETRY_CAP: u32 = 5;

/// Default periodic drain interval while online (30 seconds)
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(30);

/// Point-in-time view of the engine for UI affordances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: u64,
    /// Completion time of the most recent drain (Unix ms)
    pub last_sync_time: Option<i64>,
    /// Most recent failure, surfaced non-fatally
    pub error: Option<String>,
}

/// Single-flight drain guard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    Idle,
    Draining,
}

/// Why a drain did or did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain holds the guard; this call was a no-op
    AlreadyDraining,
    Offline,
    /// No valid session; treated as offline for drain purposes
    NoSession,
    Completed(DrainSummary),
}

/// Counts for one completed drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

struct StatusCell {
    is_online: bool,
    is_syncing: bool,
    pending_count: u64,
    last_sync_time: Option<i64>,
    error: Option<String>,
}

/// Local-first sync engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SyncEngine {
    db: Arc<Mutex<Database>>,
    remote: Arc<dyn RemoteStore>,
    session: Arc<dyn SessionProvider>,
    url_cache: SignedUrlCache,
    drain_state: Arc<StdMutex<DrainState>>,
    status: Arc<StdMutex<StatusCell>>,
    retry_cap: u32,
}

impl SyncEngine {
    /// Build an engine over an opened database.
    ///
    /// `pending_count` is recomputed from the durable queue, so mutations
    /// queued before a process restart are picked up again.
    pub async fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        let pending = LibSqlMutationQueue::new(db.connection())
            .pending_count()
            .await?;

        if pending > 0 {
            tracing::info!(pending, "Recovered pending mutations from durable queue");
        }

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            remote,
            session,
            url_cache: SignedUrlCache::new(),
            drain_state: Arc::new(StdMutex::new(DrainState::Idle)),
            status: Arc::new(StdMutex::new(StatusCell {
                // Assume online until the connectivity signal says otherwise
                is_online: true,
                is_syncing: false,
                pending_count: pending,
                last_sync_time: None,
                error: None,
            })),
            retry_cap: DEFAULT_RETRY_CAP,
        })
    }

    /// Override the dead-letter retry cap (mostly for tests)
    #[must_use]
    pub const fn with_retry_cap(mut self, cap: u32) -> Self {
        self.retry_cap = cap;
        self
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let cell = lock(&self.status);
        SyncStatus {
            is_online: cell.is_online,
            is_syncing: cell.is_syncing,
            pending_count: cell.pending_count,
            last_sync_time: cell.last_sync_time,
            error: cell.error.clone(),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        lock(&self.status).is_online
    }

    /// Durably queue a mutation, apply it optimistically to the local
    /// store, and attempt an immediate drain when online.
    ///
    /// The queue row is durable before the optimistic write becomes
    /// visible (write-ahead semantics).
    pub async fn queue_change(
        &self,
        table: Table,
        operation: Operation,
        data: Value,
    ) -> Result<QueueItem> {
        let (item, pending) = {
            let db = self.db.lock().await;
            let queue = LibSqlMutationQueue::new(db.connection());
            let store = LibSqlLocalStore::new(db.connection());

            let item = match operation {
                Operation::Insert | Operation::Update => {
                    // Mint the id first so the queued payload carries it
                    let record = CachedRecord::from_payload(data, false)?;
                    let item = queue.enqueue(table, operation, record.payload.clone()).await?;
                    store.put(table, &[record]).await?;
                    item
                }
                Operation::Delete => {
                    let item = queue.enqueue(table, operation, data).await?;
                    if let Some(id) = item.record_id() {
                        store.remove(table, &id).await?;
                    }
                    item
                }
            };

            (item, queue.pending_count().await?)
        };

        lock(&self.status).pending_count = pending;

        if self.is_online() {
            self.drain().await?;
        }

        Ok(item)
    }

    /// Force a drain attempt regardless of schedule
    pub async fn sync_now(&self) -> Result<DrainOutcome> {
        self.drain().await
    }

    /// Connectivity signal. Coming online triggers an immediate drain.
    pub async fn set_online(&self, online: bool) -> Result<()> {
        {
            let mut cell = lock(&self.status);
            if cell.is_online == online {
                return Ok(());
            }
            cell.is_online = online;
        }

        tracing::info!(online, "Connectivity changed");
        if online {
            self.drain().await?;
        }
        Ok(())
    }

    /// Visibility signal: catch up after the app was backgrounded
    pub async fn handle_visibility_change(&self, visible: bool) -> Result<()> {
        if visible && self.is_online() {
            self.drain().await?;
        }
        Ok(())
    }

    /// Store records fetched from the remote store (`synced = true`)
    pub async fn cache_data(&self, table: Table, records: Vec<Value>) -> Result<()> {
        let records = records
            .into_iter()
            .map(|payload| CachedRecord::from_payload(payload, true))
            .collect::<Result<Vec<_>>>()?;

        let db = self.db.lock().await;
        LibSqlLocalStore::new(db.connection())
            .put(table, &records)
            .await
    }

    /// Read the local mirror for a collection
    pub async fn get_cached_data(&self, table: Table) -> Result<Vec<CachedRecord>> {
        let db = self.db.lock().await;
        LibSqlLocalStore::new(db.connection()).get(table).await
    }

    /// Drop the mirror, the queue (dead letters included), and the signed
    /// URL cache. Tied to logout/panic-lock.
    pub async fn clear_cache(&self) -> Result<()> {
        {
            let db = self.db.lock().await;
            LibSqlLocalStore::new(db.connection()).clear_all().await?;
            LibSqlMutationQueue::new(db.connection()).clear_all().await?;
        }
        self.url_cache.clear_all().await;

        let mut cell = lock(&self.status);
        cell.pending_count = 0;
        cell.error = None;
        Ok(())
    }

    /// Dead-lettered items kept for operator inspection
    pub async fn failed_items(&self) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).failed().await
    }

    /// Cached signed URL for an object, minting one on miss
    pub async fn get_or_create_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_secs: i64,
    ) -> Result<String> {
        let key = SignedUrlKey::new(bucket, path);
        let remote = Arc::clone(&self.remote);
        self.url_cache
            .get_or_create(key, ttl_secs, || async move {
                let url = remote
                    .create_temporary_access_url(bucket, path, ttl_secs)
                    .await?;
                Ok(url)
            })
            .await
    }

    /// Shared signed URL cache (e.g. to start its sweeper)
    #[must_use]
    pub const fn url_cache(&self) -> &SignedUrlCache {
        &self.url_cache
    }

    /// Start the periodic drain timer; abort the handle on teardown
    #[must_use]
    pub fn spawn_periodic_drain(&self, period: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !engine.is_online() {
                    continue;
                }
                if let Err(error) = engine.drain().await {
                    tracing::error!(%error, "Periodic drain failed");
                }
            }
        })
    }

    /// Replay pending mutations in strict id order.
    ///
    /// Per-item failures are recorded and the loop continues, so one bad
    /// item does not block independent mutations. An authentication
    /// failure aborts the remainder until a fresh session arrives.
    async fn drain(&self) -> Result<DrainOutcome> {
        if !self.is_online() {
            return Ok(DrainOutcome::Offline);
        }
        if self.session.current_session().is_none() {
            tracing::debug!("No valid session; drain deferred");
            return Ok(DrainOutcome::NoSession);
        }
        let Some(_guard) = DrainGuard::try_begin(self) else {
            return Ok(DrainOutcome::AlreadyDraining);
        };

        let items = {
            let db = self.db.lock().await;
            LibSqlMutationQueue::new(db.connection()).peek_all().await?
        };

        let mut summary = DrainSummary {
            attempted: items.len(),
            ..DrainSummary::default()
        };
        let mut drain_error: Option<String> = None;

        for item in items {
            match self.replay(&item).await {
                Ok(()) => {
                    self.confirm(&item).await?;
                    summary.succeeded += 1;
                }
                Err(RemoteError::Unauthorized) => {
                    tracing::warn!(
                        id = item.id,
                        "Session expired mid-drain; deferring remaining items"
                    );
                    drain_error = Some("session expired during sync".to_string());
                    break;
                }
                Err(error) => {
                    summary.failed += 1;
                    let message = error.to_string();
                    tracing::warn!(
                        id = item.id,
                        table = %item.table,
                        operation = %item.operation,
                        error = %message,
                        "Queue item replay failed"
                    );
                    drain_error = Some(message.clone());
                    let db = self.db.lock().await;
                    LibSqlMutationQueue::new(db.connection())
                        .mark_failed(item.id, &message, self.retry_cap)
                        .await?;
                }
            }
        }

        let pending = {
            let db = self.db.lock().await;
            LibSqlMutationQueue::new(db.connection()).pending_count().await?
        };

        {
            let mut cell = lock(&self.status);
            cell.pending_count = pending;
            cell.last_sync_time = Some(chrono::Utc::now().timestamp_millis());
            cell.error = drain_error;
        }

        tracing::debug!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            pending,
            "Drain cycle finished"
        );

        Ok(DrainOutcome::Completed(summary))
    }

    async fn replay(&self, item: &QueueItem) -> RemoteResult<()> {
        let missing_id =
            || RemoteError::Rejected(format!("{} payload missing record id", item.operation));

        match item.operation {
            Operation::Insert => self.remote.insert(item.table, &item.payload).await,
            Operation::Update => {
                let id = item.record_id().ok_or_else(missing_id)?;
                self.remote.update(item.table, &id, &item.payload).await
            }
            Operation::Delete => {
                let id = item.record_id().ok_or_else(missing_id)?;
                self.remote.delete(item.table, &id).await
            }
        }
    }

    /// Queue/store bookkeeping after a confirmed remote write
    async fn confirm(&self, item: &QueueItem) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).remove(item.id).await?;

        let store = LibSqlLocalStore::new(db.connection());
        if let Some(id) = item.record_id() {
            match item.operation {
                Operation::Insert | Operation::Update => {
                    store.mark_synced(item.table, &id).await?;
                }
                Operation::Delete => {
                    // Already removed optimistically; idempotent
                    store.remove(item.table, &id).await?;
                }
            }
        }
        Ok(())
    }
}

/// RAII release for the `Idle -> Draining` transition.
struct DrainGuard<'a> {
    engine: &'a SyncEngine,
}

impl<'a> DrainGuard<'a> {
    fn try_begin(engine: &'a SyncEngine) -> Option<Self> {
        let mut state = lock(&engine.drain_state);
        if *state == DrainState::Draining {
            return None;
        }
        *state = DrainState::Draining;
        lock(&engine.status).is_syncing = true;
        Some(Self { engine })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.engine.drain_state) = DrainState::Idle;
        lock(&self.engine.status).is_syncing = false;
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
