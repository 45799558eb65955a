//! Content-addressed result cache
//!
//! Memoizes per-file stage results keyed by a hash of (stage tag, file
//! bytes) — never by path, so renames cannot serve stale entries. Entries
//! expire after a TTL and are pruned lazily on access. The cache is safe for
//! concurrent use: many readers, exclusive writer. A pipeline without a
//! cache behaves exactly like one that always misses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use xxhash_rust::xxh3::Xxh3;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Cache key: hash of stage tag and content bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn compute(stage: &str, bytes: &[u8]) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(stage.as_bytes());
        hasher.update(&[0]);
        hasher.update(bytes);
        Self(hasher.digest())
    }
}

struct Entry<V> {
    value: V,
    inserted: Instant,
}

pub struct Cache<V> {
    entries: RwLock<HashMap<CacheKey, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> Cache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    pub fn get(&self, key: CacheKey) -> Option<V> {
        {
            let entries = self.entries.read();
            let entry = entries.get(&key)?;
            if entry.inserted.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
        }
        // Expired: drop it under the write lock.
        self.entries.write().remove(&key);
        None
    }

    pub fn put(&self, key: CacheKey, value: V) {
        self.entries.write().insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Fetch through the cache: `None` cache behaves as a permanent miss.
    pub fn get_or_insert_with(
        cache: Option<&Self>,
        key: CacheKey,
        compute: impl FnOnce() -> V,
    ) -> V {
        match cache {
            Some(cache) => {
                if let Some(hit) = cache.get(key) {
                    return hit;
                }
                let value = compute();
                cache.put(key, value.clone());
                value
            }
            None => compute(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_key() {
        let a = CacheKey::compute("schema", b"CREATE TABLE t(a INT);");
        let b = CacheKey::compute("schema", b"CREATE TABLE t(a INT);");
        assert_eq!(a, b);
    }

    #[test]
    fn test_stage_tag_separates_keys() {
        let a = CacheKey::compute("schema", b"x");
        let b = CacheKey::compute("query", b"x");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hit_and_miss() {
        let cache: Cache<String> = Cache::with_default_ttl();
        let key = CacheKey::compute("schema", b"bytes");
        assert!(cache.get(key).is_none());
        cache.put(key, "value".to_string());
        assert_eq!(cache.get(key).as_deref(), Some("value"));
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: Cache<u32> = Cache::new(Duration::from_millis(0));
        let key = CacheKey::compute("schema", b"bytes");
        cache.put(key, 7);
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(key).is_none());
        assert!(cache.is_empty(), "expired entry is pruned");
    }

    #[test]
    fn test_absent_cache_is_a_miss() {
        let mut computed = 0;
        let value = Cache::<u32>::get_or_insert_with(
            None,
            CacheKey::compute("schema", b"x"),
            || {
                computed += 1;
                42
            },
        );
        assert_eq!(value, 42);
        assert_eq!(computed, 1);
    }

    #[test]
    fn test_get_or_insert_with_caches() {
        let cache: Cache<u32> = Cache::with_default_ttl();
        let key = CacheKey::compute("q", b"x");
        let first = Cache::get_or_insert_with(Some(&cache), key, || 1);
        let second = Cache::get_or_insert_with(Some(&cache), key, || 2);
        assert_eq!(first, 1);
        assert_eq!(second, 1, "second call is served from the cache");
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        let cache: Arc<Cache<u64>> = Arc::new(Cache::with_default_ttl());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let key = CacheKey::compute("stage", &[i as u8 % 4]);
                    cache.put(key, i);
                    cache.get(key)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_some());
        }
        assert!(cache.len() <= 4);
    }
}
