//! Least-frequently-used response cache.
//!
//! Reads and overwrites both count as a use. Among entries with the lowest
//! use count, the one that reached that count first is evicted.

use std::collections::{BTreeMap, HashMap};

use crate::cache::{CacheKey, ResponseCache};

struct Item<V> {
    value: V,
    frequency: u64,
    stamp: u64,
}

pub struct LfuCache<V> {
    capacity: usize,
    items: HashMap<CacheKey, Item<V>>,
    /// (frequency, stamp) -> key; the first entry is the next victim.
    order: BTreeMap<(u64, u64), CacheKey>,
    clock: u64,
}

impl<V> LfuCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            clock: 0,
        }
    }

    /// Use count of `key`, if present. Does not count as a use.
    pub fn frequency(&self, key: CacheKey) -> Option<u64> {
        self.items.get(&key).map(|i| i.frequency)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn bump(&mut self, key: CacheKey) {
        let stamp = self.tick();
        if let Some(item) = self.items.get_mut(&key) {
            self.order.remove(&(item.frequency, item.stamp));
            item.frequency += 1;
            item.stamp = stamp;
            self.order.insert((item.frequency, item.stamp), key);
        }
    }

    fn evict(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.items.remove(&key);
        }
    }
}

impl<V: Clone + Send> ResponseCache<V> for LfuCache<V> {
    fn set_response(&mut self, key: CacheKey, response: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(item) = self.items.get_mut(&key) {
            item.value = response;
            self.bump(key);
            return;
        }
        if self.items.len() >= self.capacity {
            self.evict();
        }
        let stamp = self.tick();
        self.items.insert(
            key,
            Item {
                value: response,
                frequency: 1,
                stamp,
            },
        );
        self.order.insert((1, stamp), key);
    }

    fn get_response(&mut self, key: CacheKey) -> Option<V> {
        if !self.items.contains_key(&key) {
            return None;
        }
        self.bump(key);
        self.items.get(&key).map(|i| i.value.clone())
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
