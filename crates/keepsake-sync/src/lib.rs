//! keepsake-sync - Local-first sync engine for Keepsake
//!
//! Lets a client work against a local replica of user data (notes, photos,
//! files, albums) while disconnected: mutations queue durably, replay in
//! FIFO order against the remote store once connectivity returns, and
//! remote-originated changes trigger debounced refetches via the realtime
//! reconciler.
//!
//! The remote store, its change feed, and session issuance are external
//! collaborators consumed through the traits in [`remote`] and [`session`].

pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod queue;
pub mod realtime;
pub mod remote;
pub mod session;
pub mod store;
pub mod urlcache;

pub use db::Database;
pub use engine::{DrainOutcome, DrainSummary, SyncEngine, SyncStatus};
pub use error::{Error, Result};
pub use models::{CachedRecord, Operation, QueueItem, QueueStatus, RecordId, Table};
pub use realtime::{RealtimeReconciler, Subscription};
pub use remote::{ChangeFeed, RemoteChange, RemoteError, RemoteStore};
pub use session::{SessionHandle, SessionProvider};
pub use urlcache::{SignedUrlCache, SignedUrlKey};
