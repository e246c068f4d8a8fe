//! Benchmarks for the response cache policies.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bifrost::cache::{cache_key, LfuCache, LruCache, ResponseCache};
use bifrost::protocol::{Message, Role};

const CAPACITY: usize = 1024;

fn fill(cache: &mut dyn ResponseCache<String>) {
    for key in 0..CAPACITY as u64 {
        cache.set_response(key, format!("reply {key}"));
    }
}

fn bench_lru_churn(c: &mut Criterion) {
    let mut cache: LruCache<String> = LruCache::new(CAPACITY);
    fill(&mut cache);

    // Every insert past capacity evicts.
    let mut next = CAPACITY as u64;
    c.bench_function("lru_insert_evict_1k", |b| {
        b.iter(|| {
            cache.set_response(black_box(next), String::new());
            next += 1;
        })
    });
}

fn bench_lfu_churn(c: &mut Criterion) {
    let mut cache: LfuCache<String> = LfuCache::new(CAPACITY);
    fill(&mut cache);
    for key in 0..CAPACITY as u64 / 2 {
        cache.get_response(key);
    }

    let mut next = CAPACITY as u64;
    c.bench_function("lfu_insert_evict_1k", |b| {
        b.iter(|| {
            cache.set_response(black_box(next), String::new());
            next += 1;
        })
    });
}

fn bench_hits(c: &mut Criterion) {
    let mut lru: LruCache<String> = LruCache::new(CAPACITY);
    let mut lfu: LfuCache<String> = LfuCache::new(CAPACITY);
    fill(&mut lru);
    fill(&mut lfu);

    c.bench_function("lru_get_hit", |b| {
        b.iter(|| {
            for key in (0..CAPACITY as u64).step_by(7) {
                black_box(lru.get_response(key));
            }
        })
    });
    c.bench_function("lfu_get_hit", |b| {
        b.iter(|| {
            for key in (0..CAPACITY as u64).step_by(7) {
                black_box(lfu.get_response(key));
            }
        })
    });
}

fn bench_cache_key(c: &mut Criterion) {
    let messages = vec![
        Message {
            role: Role::System,
            content: "Translate to French".to_string(),
        },
        Message {
            role: Role::User,
            content: "I love programming.".repeat(20),
        },
    ];

    c.bench_function("cache_key_two_messages", |b| {
        b.iter(|| black_box(cache_key("openai_chat", "gpt-4", black_box(&messages), 256)))
    });
}

criterion_group!(
    benches,
    bench_lru_churn,
    bench_lfu_churn,
    bench_hits,
    bench_cache_key,
);
criterion_main!(benches);
