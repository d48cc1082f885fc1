//! Time-bounded cache of signed object-storage URLs
//!
//! Avoids re-minting ephemeral credentials on every render. A safety buffer
//! is subtracted from the nominal expiry so a URL is never served when it
//! could expire mid-use.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Default margin subtracted from an entry's nominal expiry (5 minutes)
pub const DEFAULT_SAFETY_BUFFER_SECS: i64 = 300;

/// Default background sweep interval (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Cache key: storage bucket plus object path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignedUrlKey {
    pub bucket: String,
    pub path: String,
}

impl SignedUrlKey {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for SignedUrlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    url: String,
    /// Absolute expiry (Unix seconds)
    expires_at: i64,
}

/// Shared cache of signed URLs keyed by bucket + path.
#[derive(Clone)]
pub struct SignedUrlCache {
    entries: Arc<Mutex<HashMap<SignedUrlKey, CacheEntry>>>,
    safety_buffer_secs: i64,
}

impl Default for SignedUrlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SignedUrlCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            safety_buffer_secs: DEFAULT_SAFETY_BUFFER_SECS,
        }
    }

    /// Override the expiry safety buffer (mostly for tests)
    #[must_use]
    pub fn with_safety_buffer(mut self, buffer_secs: i64) -> Self {
        self.safety_buffer_secs = buffer_secs;
        self
    }

    /// Cached URL for a key, or `None` when absent or inside the safety
    /// buffer. Stale entries are evicted on read.
    pub async fn get(&self, key: &SignedUrlKey) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;

        if Self::now() + self.safety_buffer_secs >= entry.expires_at {
            entries.remove(key);
            tracing::debug!(key = %key, "Signed URL within safety buffer; evicted");
            return None;
        }

        Some(entry.url.clone())
    }

    /// Cache a URL with a nominal time-to-live in seconds
    pub async fn set(&self, key: SignedUrlKey, url: impl Into<String>, ttl_secs: i64) {
        let entry = CacheEntry {
            url: url.into(),
            expires_at: Self::now() + ttl_secs,
        };
        self.entries.lock().await.insert(key, entry);
    }

    /// Return the cached URL or invoke `factory` to mint and cache one.
    ///
    /// The lock is not held across the factory call, so two concurrent
    /// misses may both mint; the later write wins, which is harmless for
    /// signed URLs.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: SignedUrlKey,
        ttl_secs: i64,
        factory: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(url) = self.get(&key).await {
            return Ok(url);
        }

        let url = factory().await?;
        self.set(key, url.clone(), ttl_secs).await;
        Ok(url)
    }

    /// Drop one entry
    pub async fn clear(&self, key: &SignedUrlKey) {
        self.entries.lock().await.remove(key);
    }

    /// Drop every entry (logout)
    pub async fn clear_all(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of entries currently held, stale ones included
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Evict entries already past their nominal expiry.
    ///
    /// Best-effort memory tidy only; `get` re-checks expiry on every read.
    pub async fn sweep(&self) {
        let now = Self::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);

        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Swept expired signed URLs");
        }
    }

    /// Start a periodic sweep task; abort the handle on teardown
    #[must_use]
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.sweep().await;
            }
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(path: &str) -> SignedUrlKey {
        SignedUrlKey::new("media", path)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_and_get() {
        let cache = SignedUrlCache::new();
        cache.set(key("a.jpg"), "https://cdn/a?sig=1", 3600).await;

        assert_eq!(
            cache.get(&key("a.jpg")).await.as_deref(),
            Some("https://cdn/a?sig=1")
        );
        assert!(cache.get(&key("b.jpg")).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entry_inside_safety_buffer_is_not_served() {
        // expires_at = now + 200s with a 300s buffer: now + 300 >= expires_at
        let cache = SignedUrlCache::new().with_safety_buffer(300);
        cache.set(key("a.jpg"), "https://cdn/a?sig=1", 200).await;

        assert!(cache.get(&key("a.jpg")).await.is_none());
        // Evicted lazily on the failed read
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_or_create_invokes_factory_once() {
        let cache = SignedUrlCache::new();

        let url = cache
            .get_or_create(key("a.jpg"), 3600, || async {
                Ok("https://cdn/a?sig=minted".to_string())
            })
            .await
            .unwrap();
        assert_eq!(url, "https://cdn/a?sig=minted");

        // Second call is served from cache; factory would change the value
        let url = cache
            .get_or_create(key("a.jpg"), 3600, || async {
                Ok("https://cdn/a?sig=other".to_string())
            })
            .await
            .unwrap();
        assert_eq!(url, "https://cdn/a?sig=minted");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_or_create_propagates_factory_error() {
        let cache = SignedUrlCache::new();

        let result = cache
            .get_or_create(key("a.jpg"), 3600, || async {
                Err(crate::error::Error::Database("mint failed".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sweep_evicts_expired_entries() {
        let cache = SignedUrlCache::new();
        cache.set(key("stale.jpg"), "https://cdn/stale", -10).await;
        cache.set(key("fresh.jpg"), "https://cdn/fresh", 3600).await;

        cache.sweep().await;

        assert_eq!(cache.len().await, 1);
        assert!(cache.get(&key("fresh.jpg")).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_and_clear_all() {
        let cache = SignedUrlCache::new();
        cache.set(key("a.jpg"), "u1", 3600).await;
        cache.set(key("b.jpg"), "u2", 3600).await;

        cache.clear(&key("a.jpg")).await;
        assert!(cache.get(&key("a.jpg")).await.is_none());
        assert!(cache.get(&key("b.jpg")).await.is_some());

        cache.clear_all().await;
        assert!(cache.is_empty().await);
    }
}
