//! Response caching and in-flight request deduplication.
//!
//! Two independent stores share the same keys:
//!
//! - the response cache, any [`Cache`] implementation, holds parsed bodies of
//!   successful cacheable calls until it is cleared (or an entry expires, if the
//!   implementation is configured to expire entries);
//! - the [`InFlight`] map holds calls that are still running, so an identical call
//!   made meanwhile attaches to the pending one instead of hitting the network.
//!
//! Keeping them apart means a failed call never lands in the response cache.

use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A key/value store for response bodies.
///
/// Implementations may be remote; every operation can fail. The transporter
/// treats failures as misses.
///
/// # Examples
///
/// ```
/// use switchyard::cache::{Cache, InMemoryCache};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let cache = InMemoryCache::new();
/// cache.set("key", json!({ "hits": [] })).await?;
/// assert_eq!(cache.get("key").await?, Some(json!({ "hits": [] })));
///
/// cache.clear().await?;
/// assert_eq!(cache.get("key").await?, None);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;
}

/// A cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}

/// Process-local cache. Entries live forever unless a TTL is set.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Option<Duration>,
}

impl InMemoryCache {
    /// Creates a cache whose entries never expire.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache whose entries expire `ttl` after being set.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        // A TTL past the clock's range never expires.
        let expires_at = self.ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Chains caches: every operation goes to the first cache, and moves on to the
/// next one only when the current one fails.
///
/// Useful to put an external store in front of an [`InMemoryCache`].
pub struct FallbackableCache {
    caches: Vec<Arc<dyn Cache>>,
}

impl FallbackableCache {
    /// Creates a chain, tried in order.
    pub fn new(caches: Vec<Arc<dyn Cache>>) -> Self {
        Self { caches }
    }
}

impl std::fmt::Debug for FallbackableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackableCache")
            .field("caches", &self.caches.len())
            .finish()
    }
}

macro_rules! fall_back {
    ($self:ident, $cache:ident => $op:expr) => {{
        let mut last_error = None;
        for $cache in &$self.caches {
            match $op.await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!(error = %e, "Cache failed, falling back to the next one");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Err(Error::Cache("no cache configured".to_string())),
        }
    }};
}

#[async_trait]
impl Cache for FallbackableCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.caches.is_empty() {
            return Ok(None);
        }
        fall_back!(self, cache => cache.get(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        if self.caches.is_empty() {
            return Ok(());
        }
        fall_back!(self, cache => cache.set(key, value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.caches.is_empty() {
            return Ok(());
        }
        fall_back!(self, cache => cache.delete(key))
    }

    async fn clear(&self) -> Result<()> {
        if self.caches.is_empty() {
            return Ok(());
        }
        fall_back!(self, cache => cache.clear())
    }
}

type SharedCall<T> = Shared<BoxFuture<'static, T>>;

/// Calls that are currently running, by key.
///
/// Handles are weak: once every caller of a pending call has gone away, the call
/// is dropped with them and the key is free again.
pub struct InFlight<T: Clone> {
    calls: Registry<T>,
}

impl<T: Clone> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the pending call for `key`, if one is running.
    pub fn get(&self, key: &str) -> Option<SharedCall<T>> {
        self.calls.lock().get(key).and_then(WeakShared::upgrade)
    }

    /// Runs `call` under `key`, or attaches to the call already running under it.
    ///
    /// Returns the result and whether this caller attached to an existing call.
    /// The key is released as soon as the call settles, whatever its outcome.
    pub async fn run<F>(&self, key: &str, call: F) -> (T, bool)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (shared, attached) = {
            let mut calls = self.calls.lock();
            match calls.get(key).and_then(WeakShared::upgrade) {
                Some(existing) => (existing, true),
                None => {
                    let release = Release {
                        calls: Arc::clone(&self.calls),
                        key: key.to_string(),
                    };
                    let shared = async move {
                        let output = call.await;
                        release.settle();
                        output
                    }
                    .boxed()
                    .shared();

                    if let Some(weak) = shared.downgrade() {
                        calls.insert(key.to_string(), weak);
                    }
                    (shared, false)
                }
            }
        };

        (shared.await, attached)
    }

    /// Number of keys currently registered.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns `true` if no call is registered.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

type Registry<T> = Arc<Mutex<HashMap<String, WeakShared<BoxFuture<'static, T>>>>>;

/// Owned by a registered call; frees its key when the call settles or is dropped
/// unfinished.
struct Release<T: Clone> {
    calls: Registry<T>,
    key: String,
}

impl<T: Clone> Release<T> {
    fn settle(&self) {
        self.calls.lock().remove(&self.key);
    }
}

impl<T: Clone> Drop for Release<T> {
    fn drop(&mut self) {
        let mut calls = self.calls.lock();
        // A live entry under the key belongs to a newer call.
        let live = calls.get(&self.key).and_then(WeakShared::upgrade);
        if live.is_none() {
            calls.remove(&self.key);
        }
        // The upgraded handle may be the last one; release the lock before it drops.
        drop(calls);
        drop(live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            Err(Error::Cache("unavailable".to_string()))
        }

        async fn set(&self, _key: &str, _value: Value) -> Result<()> {
            Err(Error::Cache("unavailable".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(Error::Cache("unavailable".to_string()))
        }

        async fn clear(&self) -> Result<()> {
            Err(Error::Cache("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_null_cache_never_stores() {
        let cache = NullCache;
        cache.set("k", json!(1)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_delete() {
        let cache = InMemoryCache::new();
        cache.set("a", json!(1)).await.unwrap();
        cache.set("b", json!(2)).await.unwrap();
        cache.delete("a").await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap(), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_ttl_expiry() {
        let cache = InMemoryCache::with_ttl(Duration::from_secs(60));
        cache.set("k", json!("v")).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_fallbackable_skips_failing_cache() {
        let memory = Arc::new(InMemoryCache::new());
        let cache = FallbackableCache::new(vec![Arc::new(BrokenCache), memory.clone()]);

        cache.set("k", json!({"hits": []})).await.unwrap();
        assert_eq!(memory.get("k").await.unwrap(), Some(json!({"hits": []})));
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"hits": []})));
    }

    #[tokio::test]
    async fn test_fallbackable_surfaces_error_when_all_fail() {
        let cache = FallbackableCache::new(vec![Arc::new(BrokenCache), Arc::new(BrokenCache)]);
        assert!(matches!(cache.get("k").await, Err(Error::Cache(_))));

        let empty = FallbackableCache::new(Vec::new());
        assert_eq!(empty.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_flight_collapses_concurrent_calls() {
        let in_flight: InFlight<u32> = InFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        let first_runs = runs.clone();
        let first = in_flight.run("k", async move {
            first_runs.fetch_add(1, Ordering::SeqCst);
            let _ = wait.await;
            7
        });
        let second_runs = runs.clone();
        let second = in_flight.run("k", async move {
            second_runs.fetch_add(1, Ordering::SeqCst);
            8
        });

        let releaser = async move {
            tokio::task::yield_now().await;
            let _ = release.send(());
        };

        let ((a, a_attached), (b, b_attached), ()) = tokio::join!(first, second, releaser);

        assert_eq!((a, b), (7, 7));
        assert!(!a_attached);
        assert!(b_attached);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_released_after_settle() {
        let in_flight: InFlight<u32> = InFlight::new();

        let (first, _) = in_flight.run("k", async { 1 }).await;
        let (second, attached) = in_flight.run("k", async { 2 }).await;

        assert_eq!((first, second), (1, 2));
        assert!(!attached);
        assert!(in_flight.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_timed_out_calls_do_not_accumulate() {
        let in_flight: InFlight<u32> = InFlight::new();

        for i in 0..100 {
            let key = format!("k{}", i);
            let call = in_flight.run(&key, futures::future::pending::<u32>());
            let result = tokio::time::timeout(Duration::from_millis(1), call).await;
            assert!(result.is_err());
        }

        assert!(in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_unbounded_ttl_never_expires() {
        let cache = InMemoryCache::with_ttl(Duration::MAX);
        cache.set("k", json!(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_in_flight_abandoned_call_frees_key() {
        let in_flight: InFlight<u32> = InFlight::new();

        {
            let pending = in_flight.run("k", futures::future::pending::<u32>());
            futures::pin_mut!(pending);
            assert!(futures::poll!(pending.as_mut()).is_pending());
            assert_eq!(in_flight.len(), 1);
        }

        assert!(in_flight.get("k").is_none());
        assert_eq!(in_flight.len(), 0);
        let (value, attached) = in_flight.run("k", async { 3 }).await;
        assert_eq!(value, 3);
        assert!(!attached);
    }
}
