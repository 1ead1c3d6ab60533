use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

use lru::LruCache;

/// Cached bandit decision for one user and rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmabCacheValue {
    /// Hash of the filtered attributes the decision was made for.
    pub attributes_hash: String,
    pub variation_id: String,
    pub cmab_uuid: String,
}

/// Storage for bandit decisions, keyed by user and rule.
///
/// [`CmabCache`] is the default. Implement this to keep decisions elsewhere, for example in a
/// store shared between processes.
pub trait CmabCacheStore: Send + Sync {
    fn lookup(&self, key: &str) -> Option<CmabCacheValue>;

    fn save(&self, key: String, value: CmabCacheValue);

    fn remove(&self, key: &str);

    /// Remove all entries.
    fn reset(&self);
}

/// Thread-safe, bounded cache of bandit decisions.
///
/// Least-recently-used entries are evicted once `capacity` is reached. Entries older than the
/// configured TTL are treated as missing. Concurrent callers may race on the same key; the last
/// write wins.
pub struct CmabCache {
    /// `None` when caching is disabled (zero capacity).
    entries: Option<Mutex<LruCache<String, (CmabCacheValue, Instant)>>>,
    /// `None` when entries never expire.
    ttl: Option<Duration>,
}

impl CmabCache {
    /// Create a cache holding at most `capacity` entries, each valid for `ttl`.
    ///
    /// A `capacity` of zero disables caching and a `ttl` of zero disables expiration.
    pub fn new(capacity: usize, ttl: Duration) -> CmabCache {
        CmabCache {
            entries: NonZeroUsize::new(capacity).map(|capacity| Mutex::new(LruCache::new(capacity))),
            ttl: (!ttl.is_zero()).then_some(ttl),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<CmabCacheValue> {
        let mut entries = self.lock()?;
        let (value, saved_at) = entries.get(key)?;
        if self.ttl.is_some_and(|ttl| saved_at.elapsed() >= ttl) {
            entries.pop(key);
            return None;
        }
        Some(value.clone())
    }

    pub fn save(&self, key: String, value: CmabCacheValue) {
        if let Some(mut entries) = self.lock() {
            entries.put(key, (value, Instant::now()));
        }
    }

    pub fn remove(&self, key: &str) {
        if let Some(mut entries) = self.lock() {
            entries.pop(key);
        }
    }

    /// Remove all entries.
    pub fn reset(&self) {
        if let Some(mut entries) = self.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Option<std::sync::MutexGuard<'_, LruCache<String, (CmabCacheValue, Instant)>>> {
        let entries = self.entries.as_ref()?;
        Some(
            entries
                .lock()
                .expect("thread holding cmab cache lock should not panic"),
        )
    }
}

impl CmabCacheStore for CmabCache {
    fn lookup(&self, key: &str) -> Option<CmabCacheValue> {
        CmabCache::lookup(self, key)
    }

    fn save(&self, key: String, value: CmabCacheValue) {
        CmabCache::save(self, key, value)
    }

    fn remove(&self, key: &str) {
        CmabCache::remove(self, key)
    }

    fn reset(&self) {
        CmabCache::reset(self)
    }
}
