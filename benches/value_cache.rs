//! Benchmark: value cache hits, misses with eviction, and shard counts.
//!
//! Compares a single shard against the default sharded layout when many
//! threads hit the cache at once.

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use plug_flow::{StructuralHash, Value, ValueCache};

fn keys(count: u64) -> Vec<StructuralHash> {
    (0..count).map(|i| StructuralHash::of(&i)).collect()
}

fn benchmark_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_cache_hit");

    for shards in [1, 16] {
        let cache = ValueCache::with_shards(usize::MAX, shards);
        let keys = keys(1024);
        for key in &keys {
            cache.set(*key, Value::new(0u64), 8);
        }

        group.bench_with_input(BenchmarkId::new("shards", shards), &shards, |b, _| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(cache.get(black_box(&keys[i])));
            });
        });
    }

    group.finish();
}

fn benchmark_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_cache_evict");

    // Room for 256 entries, so every insert past that evicts one.
    for shards in [1, 16] {
        let cache = ValueCache::with_shards(256 * 8, shards);
        let keys = keys(4096);

        group.bench_with_input(BenchmarkId::new("shards", shards), &shards, |b, _| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(cache.set(keys[i], Value::new(i as u64), 8));
            });
        });
    }

    group.finish();
}

fn benchmark_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_cache_contention");
    let threads = 4;

    for shards in [1, 16] {
        let cache = Arc::new(ValueCache::with_shards(512 * 8, shards));
        let keys = Arc::new(keys(2048));

        group.bench_with_input(BenchmarkId::new("shards", shards), &shards, |b, _| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let cache = cache.clone();
                        let keys = keys.clone();
                        thread::spawn(move || {
                            for (i, key) in keys.iter().enumerate().skip(t).step_by(threads) {
                                if cache.get(key).is_none() {
                                    cache.set(*key, Value::new(i as u64), 8);
                                }
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    let _ = handle.join();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_hits, benchmark_eviction, benchmark_contention);
criterion_main!(benches);
