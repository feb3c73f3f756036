//! A small bounded TTL cache shared by the support capabilities.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Bounded map with per-entry expiry; least-recently-inserted entries are
/// evicted once `capacity` is reached. Tokio's `Instant` so tests can pause
/// time.
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<CacheInner<K, V>>,
}

struct CacheInner<K, V> {
    entries: HashMap<K, (Instant, V)>,
    order: VecDeque<K>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().expect("Locking failed");
        match inner.entries.get(key) {
            Some((inserted_at, value)) if inserted_at.elapsed() < self.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().expect("Locking failed");
        if inner.entries.insert(key.clone(), (Instant::now(), value)).is_none() {
            inner.order.push_back(key);
        }
        while self.capacity < inner.entries.len() {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    pub fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock().expect("Locking failed");
        inner.entries.remove(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("Locking failed");
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("Locking failed").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60), 10);
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), Some(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&"k"), None);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }
}
