use lru::LruCache;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Thread-safe LRU cache with time-based expiration
pub struct TimedLruCache<K, V> {
    cache: Arc<Mutex<LruCache<K, CacheEntry<V>>>>,
    ttl: Duration,
}

/// Cache entry with timestamp for TTL support
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    timestamp: Instant,
}

impl<K, V> TimedLruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let non_zero_capacity =
            NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(non_zero_capacity))),
            ttl,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            timestamp: Instant::now(),
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, entry);
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(entry) = cache.get(key) {
                if entry.timestamp.elapsed() < self.ttl {
                    return Some(entry.value.clone());
                } else {
                    cache.pop(key);
                }
            }
        }
        None
    }

    /// Check presence without touching LRU order.
    pub fn contains(&self, key: &K) -> bool {
        if let Ok(cache) = self.cache.lock() {
            if let Some(entry) = cache.peek(key) {
                return entry.timestamp.elapsed() < self.ttl;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Drop entries whose TTL has lapsed.
    pub fn cleanup_expired(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            let now = Instant::now();
            let expired_keys: Vec<K> = cache
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.timestamp) >= self.ttl)
                .map(|(k, _)| k.clone())
                .collect();

            for key in expired_keys {
                cache.pop(&key);
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().map(|c| c.cap().get()).unwrap_or(0)
    }
}

impl<K, V> Clone for TimedLruCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            ttl: self.ttl,
        }
    }
}

impl<K: Hash + Eq, V> fmt::Debug for TimedLruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedLruCache")
            .field("cache", &self.cache)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Cache counters exposed for telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub capacity: usize,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// FEN-keyed cache with hit/miss accounting.
///
/// Serves both the per-game resolution cache and the oracle evaluation
/// cache; the value type carries whatever the caller memoizes.
#[derive(Debug)]
pub struct FenKeyedCache<V> {
    cache: TimedLruCache<String, V>,
    hit_count: Arc<Mutex<u64>>,
    miss_count: Arc<Mutex<u64>>,
}

impl<V: Clone> FenKeyedCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: TimedLruCache::new(capacity, ttl),
            hit_count: Arc::new(Mutex::new(0)),
            miss_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn get(&self, fen: &str) -> Option<V> {
        if let Some(value) = self.cache.get(&fen.to_string()) {
            if let Ok(mut hits) = self.hit_count.lock() {
                *hits += 1;
            }
            Some(value)
        } else {
            if let Ok(mut misses) = self.miss_count.lock() {
                *misses += 1;
            }
            None
        }
    }

    pub fn store(&self, fen: &str, value: V) {
        self.cache.insert(fen.to_string(), value);
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hit_count.lock().map(|h| *h).unwrap_or(0);
        let misses = self.miss_count.lock().map(|m| *m).unwrap_or(0);
        let hit_ratio = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        };

        CacheStats {
            capacity: self.cache.capacity(),
            size: self.cache.len(),
            hits,
            misses,
            hit_ratio,
        }
    }

    /// Clear cache and reset statistics
    pub fn clear(&self) {
        self.cache.clear();
        if let Ok(mut hits) = self.hit_count.lock() {
            *hits = 0;
        }
        if let Ok(mut misses) = self.miss_count.lock() {
            *misses = 0;
        }
    }
}

impl<V> Clone for FenKeyedCache<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            hit_count: Arc::clone(&self.hit_count),
            miss_count: Arc::clone(&self.miss_count),
        }
    }
}
