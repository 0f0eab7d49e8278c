//! Bounded TTL cache service
//!
//! Used for context lookups and recent query→bundle results. The cache is
//! explicitly injected, never global: a service constructed with
//! `TtlCache::disabled()` behaves exactly like one that always misses, which
//! keeps tests free of cache effects. Caching is best-effort throughout - a
//! miss always degrades to a live computation.

use ahash::AHashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL cache keyed by string, bounded in capacity
pub struct TtlCache<V> {
    inner: Mutex<AHashMap<String, Entry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache holding up to `capacity` entries for `ttl` each
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(AHashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Create a cache that never stores anything (capacity 0)
    pub fn disabled() -> Self {
        Self::new(Duration::from_secs(0), 0)
    }

    /// Look up a key, evicting it if expired
    pub fn get(&self, key: &str) -> Option<V> {
        if self.capacity == 0 {
            return None;
        }

        let mut inner = self.inner.lock().unwrap();
        match inner.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert a value, evicting expired entries first and then the
    /// soonest-to-expire entry if the cache is still full
    pub fn put(&self, key: impl Into<String>, value: V) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        if inner.len() >= self.capacity {
            inner.retain(|_, entry| entry.expires_at > now);
        }

        if inner.len() >= self.capacity {
            if let Some(oldest) = inner
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone())
            {
                inner.remove(&oldest);
            }
        }

        inner.insert(
            key.into(),
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}
