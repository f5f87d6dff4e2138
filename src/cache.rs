//! Bounded TTL cache owned by whoever builds it.

use std::hash::Hash;
use std::time::Duration;

use moka::sync::Cache;

/// Capacity-bounded cache whose entries expire `ttl` after insertion.
///
/// Expired and evicted entries are reclaimed during normal reads and writes;
/// [`TtlCache::sweep`] forces that maintenance to run now.
pub struct TtlCache<K, V> {
    ttl: Duration,
    inner: Cache<K, V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { ttl, inner }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_capacity(&self) -> Option<u64> {
        self.inner.policy().max_capacity()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    pub fn put(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Entry count as of the last maintenance run.
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply pending expirations and evictions.
    pub fn sweep(&self) {
        self.inner.run_pending_tasks();
    }

    /// Drop every entry. The cache stays usable afterwards.
    pub fn shutdown(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
        tracing::debug!("Cache cleared on shutdown");
    }
}
