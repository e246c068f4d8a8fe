//! Response cache for completed (non-streaming) generations.
//!
//! - [`lru`]: evicts the least recently used entry
//! - [`lfu`]: evicts the least frequently used entry, oldest first on ties
//!
//! Entries are keyed by a 64-bit hash of the normalized request, see
//! [`cache_key`].

pub mod lfu;
pub mod lru;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::config::{CacheConfig, CachePolicy};
use crate::protocol::Message;

pub use lfu::LfuCache;
pub use lru::LruCache;

/// Cache key derived from a request.
pub type CacheKey = u64;

/// Storage behind the response cache.
pub trait ResponseCache<V>: Send {
    /// Insert or overwrite the value for `key`, evicting if at capacity.
    fn set_response(&mut self, key: CacheKey, response: V);

    /// Look up `key`, counting the access for the eviction policy.
    fn get_response(&mut self, key: CacheKey) -> Option<V>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the configured cache, or `None` when caching is disabled.
pub fn new_response_cache<V>(config: &CacheConfig) -> Option<Box<dyn ResponseCache<V>>>
where
    V: Clone + Send + 'static,
{
    if !config.enabled {
        return None;
    }
    let cache: Box<dyn ResponseCache<V>> = match config.policy {
        CachePolicy::Lru => Box::new(LruCache::new(config.capacity)),
        CachePolicy::Lfu => Box::new(LfuCache::new(config.capacity)),
    };
    Some(cache)
}

/// Hash the parts of a request that determine its reply.
pub fn cache_key(dialect: &str, model: &str, messages: &[Message], max_tokens: usize) -> CacheKey {
    let mut hasher = DefaultHasher::new();
    dialect.hash(&mut hasher);
    model.hash(&mut hasher);
    messages.hash(&mut hasher);
    max_tokens.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;

    fn msgs(text: &str) -> Vec<Message> {
        vec![Message {
            role: Role::User,
            content: text.to_string(),
        }]
    }

    #[test]
    fn test_cache_key_distinguishes_inputs() {
        let base = cache_key("openai", "gpt-4", &msgs("hi"), 16);
        assert_eq!(base, cache_key("openai", "gpt-4", &msgs("hi"), 16));
        assert_ne!(base, cache_key("anthropic", "gpt-4", &msgs("hi"), 16));
        assert_ne!(base, cache_key("openai", "gpt-4o", &msgs("hi"), 16));
        assert_ne!(base, cache_key("openai", "gpt-4", &msgs("hello"), 16));
        assert_ne!(base, cache_key("openai", "gpt-4", &msgs("hi"), 17));
    }

    #[test]
    fn test_disabled_cache_is_none() {
        let config = CacheConfig::default();
        assert!(new_response_cache::<String>(&config).is_none());
    }

    #[test]
    fn test_factory_honors_policy() {
        let config = CacheConfig {
            enabled: true,
            policy: CachePolicy::Lfu,
            capacity: 2,
        };
        let mut cache = new_response_cache::<String>(&config).unwrap();
        cache.set_response(1, "one".into());
        cache.set_response(2, "two".into());
        cache.get_response(1);
        cache.set_response(3, "three".into());
        // Key 2 had the lowest use count.
        assert!(cache.get_response(2).is_none());
        assert_eq!(cache.len(), 2);
    }
}
