//! Integration tests for the configured response cache.

use bifrost::cache::{cache_key, new_response_cache, ResponseCache};
use bifrost::config::{CacheConfig, CachePolicy};
use bifrost::protocol::{Message, Role};

fn cache(policy: CachePolicy, capacity: usize) -> Box<dyn ResponseCache<String>> {
    new_response_cache(&CacheConfig {
        enabled: true,
        policy,
        capacity,
    })
    .expect("cache enabled")
}

/// Key 1 is read often but long ago; key 2 is read once, recently.
fn hot_then_recent(cache: &mut dyn ResponseCache<String>) {
    cache.set_response(1, "hot".to_string());
    cache.set_response(2, "recent".to_string());
    for _ in 0..5 {
        cache.get_response(1);
    }
    cache.get_response(2);
    cache.set_response(3, "new".to_string());
}

#[test]
fn test_policies_pick_different_victims() {
    let mut lru = cache(CachePolicy::Lru, 2);
    hot_then_recent(lru.as_mut());
    assert!(lru.get_response(1).is_none());
    assert!(lru.get_response(2).is_some());

    let mut lfu = cache(CachePolicy::Lfu, 2);
    hot_then_recent(lfu.as_mut());
    assert!(lfu.get_response(2).is_none());
    assert!(lfu.get_response(1).is_some());
}

#[test]
fn test_disabled_cache_is_absent() {
    let config = CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    };
    assert!(new_response_cache::<String>(&config).is_none());
}

#[test]
fn test_capacity_is_respected() {
    for policy in [CachePolicy::Lru, CachePolicy::Lfu] {
        let mut cache = cache(policy, 8);
        for key in 0..100 {
            cache.set_response(key, key.to_string());
        }
        assert_eq!(cache.len(), 8, "{policy:?}");
    }
}

#[test]
fn test_keys_separate_requests() {
    let messages = vec![Message {
        role: Role::User,
        content: "I love programming.".to_string(),
    }];
    let base = cache_key("openai_chat", "gpt-4", &messages, 256);

    assert_eq!(base, cache_key("openai_chat", "gpt-4", &messages, 256));
    assert_ne!(base, cache_key("anthropic", "gpt-4", &messages, 256));
    assert_ne!(base, cache_key("openai_chat", "gpt-4o", &messages, 256));
    assert_ne!(base, cache_key("openai_chat", "gpt-4", &messages, 16));

    let other = vec![Message {
        role: Role::System,
        content: "I love programming.".to_string(),
    }];
    assert_ne!(base, cache_key("openai_chat", "gpt-4", &other, 256));
}
