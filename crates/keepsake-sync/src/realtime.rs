//! Realtime reconciler: debounced refetch triggers from remote changes
//!
//! One feed subscription and one pump task exist per table no matter how
//! many local subscribers register. Change payloads are never applied as
//! deltas; subscribers are expected to refetch authoritative state, and a
//! burst of changes collapses into a single fan-out after a quiet period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::Table;
use crate::remote::{ChangeFeed, RemoteChange};

/// Default quiet period before a refetch fans out (1 second)
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

type Callback = Arc<dyn Fn() + Send + Sync>;
type SubscriberMap = Arc<Mutex<HashMap<u64, Callback>>>;
type ChannelMap = Arc<Mutex<HashMap<Table, TableChannel>>>;

struct TableChannel {
    subscribers: SubscriberMap,
    pump: JoinHandle<()>,
}

/// Multiplexes remote change notifications into debounced local refetches.
pub struct RealtimeReconciler {
    feed: Arc<dyn ChangeFeed>,
    debounce: Duration,
    channels: ChannelMap,
    next_token: AtomicU64,
}

impl RealtimeReconciler {
    #[must_use]
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            feed,
            debounce: DEFAULT_DEBOUNCE,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Override the debounce window (mostly for tests)
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Register a refetch callback for one table.
    ///
    /// The first subscriber for a table opens the remote subscription;
    /// later ones share it. Dropping the returned guard unregisters, and
    /// the last drop tears the channel down.
    pub async fn subscribe(
        &self,
        table: Table,
        on_change: impl Fn() + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(on_change);

        if Self::try_join_existing(&self.channels, table, token, &callback) {
            return Ok(Subscription {
                table,
                token,
                channels: Arc::clone(&self.channels),
            });
        }

        let receiver = self.feed.subscribe_to_changes(table).await?;

        // A concurrent subscriber may have opened the channel while we
        // awaited; joining it drops our duplicate receiver.
        if !Self::try_join_existing(&self.channels, table, token, &callback) {
            let subscribers: SubscriberMap =
                Arc::new(Mutex::new(HashMap::from([(token, callback)])));
            let pump = tokio::spawn(Self::pump(
                table,
                receiver,
                Arc::clone(&subscribers),
                self.debounce,
            ));

            lock(&self.channels).insert(table, TableChannel { subscribers, pump });
            tracing::debug!(table = %table, "Opened realtime channel");
        }

        Ok(Subscription {
            table,
            token,
            channels: Arc::clone(&self.channels),
        })
    }

    /// Register one callback across several tables
    pub async fn subscribe_many(
        &self,
        tables: &[Table],
        on_change: impl Fn() + Send + Sync + 'static,
    ) -> Result<Vec<Subscription>> {
        let callback: Callback = Arc::new(on_change);
        let mut subscriptions = Vec::with_capacity(tables.len());
        for &table in tables {
            let callback = Arc::clone(&callback);
            subscriptions.push(self.subscribe(table, move || callback()).await?);
        }
        Ok(subscriptions)
    }

    fn try_join_existing(
        channels: &ChannelMap,
        table: Table,
        token: u64,
        callback: &Callback,
    ) -> bool {
        let channels = lock(channels);
        channels.get(&table).is_some_and(|channel| {
            lock(&channel.subscribers).insert(token, Arc::clone(callback));
            true
        })
    }

    /// Per-table pump: absorb a burst, then fan out once.
    ///
    /// Each incoming event restarts the quiet-period timer, so only the
    /// last debounced invocation wins. Exits when the feed closes.
    async fn pump(
        table: Table,
        mut receiver: mpsc::UnboundedReceiver<RemoteChange>,
        subscribers: SubscriberMap,
        debounce: Duration,
    ) {
        loop {
            let Some(change) = receiver.recv().await else {
                tracing::debug!(table = %table, "Change feed closed");
                return;
            };
            tracing::debug!(
                table = %table,
                operation = ?change.operation,
                record_id = ?change.record_id,
                "Remote change received"
            );

            let mut closed = false;
            loop {
                match tokio::time::timeout(debounce, receiver.recv()).await {
                    Ok(Some(_)) => {} // burst continues; timer resets
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break, // quiet period elapsed
                }
            }

            let callbacks: Vec<Callback> = lock(&subscribers).values().cloned().collect();
            tracing::debug!(table = %table, fanout = callbacks.len(), "Triggering refetch");
            for callback in callbacks {
                callback();
            }

            if closed {
                return;
            }
        }
    }
}

impl Drop for RealtimeReconciler {
    fn drop(&mut self) {
        // Teardown cancels every per-table pump and its pending debounce
        for (_, channel) in lock(&self.channels).drain() {
            channel.pump.abort();
        }
    }
}

/// Guard for one registered callback; unregisters on drop.
pub struct Subscription {
    table: Table,
    token: u64,
    channels: ChannelMap,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = lock(&self.channels);
        let now_empty = channels.get(&self.table).is_some_and(|channel| {
            let mut subscribers = lock(&channel.subscribers);
            subscribers.remove(&self.token);
            subscribers.is_empty()
        });

        if now_empty {
            if let Some(channel) = channels.remove(&self.table) {
                channel.pump.abort();
                tracing::debug!(table = %self.table, "Closed realtime channel");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
