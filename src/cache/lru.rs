//! Least-recently-used response cache.

use std::collections::{BTreeMap, HashMap};

use crate::cache::{CacheKey, ResponseCache};

struct Entry<V> {
    value: V,
    last_used: u64,
}

/// LRU cache. Recency is a logical clock; `order` maps clock values back to
/// keys so the oldest entry is always the first one.
pub struct LruCache<V> {
    capacity: usize,
    entries: HashMap<CacheKey, Entry<V>>,
    order: BTreeMap<u64, CacheKey>,
    clock: u64,
}

impl<V> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, key: CacheKey) {
        let now = self.tick();
        if let Some(entry) = self.entries.get_mut(&key) {
            self.order.remove(&entry.last_used);
            entry.last_used = now;
            self.order.insert(now, key);
        }
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
        }
    }
}

impl<V: Clone + Send> ResponseCache<V> for LruCache<V> {
    fn set_response(&mut self, key: CacheKey, response: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = response;
            self.touch(key);
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        let now = self.tick();
        self.entries.insert(
            key,
            Entry {
                value: response,
                last_used: now,
            },
        );
        self.order.insert(now, key);
    }

    fn get_response(&mut self, key: CacheKey) -> Option<V> {
        if !self.entries.contains_key(&key) {
            return None;
        }
        self.touch(key);
        self.entries.get(&key).map(|e| e.value.clone())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize) -> LruCache<String> {
        let mut cache = LruCache::new(capacity);
        for i in 1..=3 {
            cache.set_response(i, format!("Response for Query {i}"));
        }
        cache
    }

    #[test]
    fn test_set_get() {
        let mut cache = filled(3);
        for i in 1..=3 {
            assert_eq!(
                cache.get_response(i).as_deref(),
                Some(format!("Response for Query {i}").as_str())
            );
        }
    }

    #[test]
    fn test_evicts_least_recent() {
        let mut cache = filled(3);
        cache.set_response(4, "Response for Query 4".into());
        assert!(cache.get_response(1).is_none());
        assert_eq!(cache.get_response(4).as_deref(), Some("Response for Query 4"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_read_refreshes_recency() {
        let mut cache = filled(3);
        cache.get_response(1);
        cache.set_response(4, "Response for Query 4".into());
        assert!(cache.get_response(2).is_none());
        assert!(cache.get_response(1).is_some());
    }

    #[test]
    fn test_overwrite_updates_value_and_recency() {
        let mut cache = filled(3);
        cache.set_response(1, "updated".into());
        cache.set_response(4, "Response for Query 4".into());
        assert_eq!(cache.get_response(1).as_deref(), Some("updated"));
        assert!(cache.get_response(2).is_none());
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache: LruCache<String> = LruCache::new(0);
        cache.set_response(1, "x".into());
        assert!(cache.is_empty());
        assert!(cache.get_response(1).is_none());
    }
}
