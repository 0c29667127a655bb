//! Performance benchmarks for objcache
//!
//! This benchmark suite measures:
//! - InMemory backend operations (set, get, delete)
//! - ObjectCache operations (local hit, backend hit, multi-get, set)
//! - Storage key derivation
//! - Payload encoding across different sizes
//!
//! Run with: cargo bench
//! View results: open target/criterion/report/index.html

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use objcache::backend::{CacheBackend, InMemoryBackend};
use objcache::groups::GroupRegistry;
use objcache::key::KeyCodec;
use objcache::serialization::{decode, encode};
use objcache::ObjectCache;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use tokio::sync::Mutex;

// ============================================================================
// Benchmark Test Fixtures
// ============================================================================

/// Benchmark value with configurable data size
#[derive(Clone, Serialize, Deserialize)]
struct BenchValue {
    id: String,
    data: Vec<u8>,
}

impl BenchValue {
    fn new(id: &str, size: usize) -> Self {
        BenchValue {
            id: id.to_string(),
            data: vec![0u8; size],
        }
    }
}

fn engine(backend: &InMemoryBackend) -> ObjectCache<InMemoryBackend> {
    ObjectCache::new(backend.clone(), KeyCodec::new("1").with_salt("bench"))
}

// ============================================================================
// Group 1: InMemory Backend Benchmarks
// ============================================================================

fn inmemory_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_backend");

    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    for size in [100, 1_000, 10_000, 100_000].iter() {
        // SET operation
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("set", size), size, |b, &size| {
                let backend = InMemoryBackend::new();
                let payload = encode(&BenchValue::new("v", size)).expect("Failed to encode");

                b.to_async(&rt).iter(|| async {
                    backend
                        .set(black_box("test_key"), black_box(&payload), 0)
                        .await
                        .expect("Failed to set")
                });
            });

        // GET operation (cache hit)
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("get_hit", size), size, |b, &size| {
                let backend = InMemoryBackend::new();
                let payload = encode(&BenchValue::new("v", size)).expect("Failed to encode");
                rt.block_on(async {
                    backend
                        .set("test_key", &payload, 0)
                        .await
                        .expect("Failed to set");
                });

                b.to_async(&rt)
                    .iter(|| async { backend.get(black_box("test_key")).await });
            });
    }

    // GET operation (cache miss) - size doesn't matter for misses
    group.bench_function("get_miss", |b| {
        let backend = InMemoryBackend::new();

        b.to_async(&rt)
            .iter(|| async { backend.get(black_box("nonexistent_key")).await });
    });

    // DELETE operation
    group.bench_function("delete", |b| {
        let backend = InMemoryBackend::new();
        let payload = encode(&BenchValue::new("v", 1000)).expect("Failed to encode");

        b.to_async(&rt).iter(|| async {
            backend
                .set("test_key", &payload, 0)
                .await
                .expect("Failed to set");
            backend.delete(black_box("test_key")).await
        });
    });

    group.finish();
}

// ============================================================================
// Group 2: ObjectCache Benchmarks
// ============================================================================

fn engine_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_cache");

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    for size in [100, 1_000, 10_000].iter() {
        // Local hit: served from the mirror, decode only
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("get_local_hit", size), size, |b, &size| {
                let backend = InMemoryBackend::new();
                let cache = Mutex::new(engine(&backend));
                rt.block_on(async {
                    cache
                        .lock()
                        .await
                        .set("hot", &BenchValue::new("hot", size), "bench", 0)
                        .await
                        .expect("Failed to populate cache");
                });

                b.to_async(&rt).iter(|| async {
                    cache
                        .lock()
                        .await
                        .get::<BenchValue, _>(black_box("hot"), "bench", false)
                        .await
                });
            });

        // Forced read: key derivation + backend round trip + decode
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("get_forced", size), size, |b, &size| {
                let backend = InMemoryBackend::new();
                let cache = Mutex::new(engine(&backend));
                rt.block_on(async {
                    cache
                        .lock()
                        .await
                        .set("hot", &BenchValue::new("hot", size), "bench", 0)
                        .await
                        .expect("Failed to populate cache");
                });

                b.to_async(&rt).iter(|| async {
                    cache
                        .lock()
                        .await
                        .get::<BenchValue, _>(black_box("hot"), "bench", true)
                        .await
                });
            });

        // SET: encode + backend store + mirror update
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("set", size), size, |b, &size| {
                let backend = InMemoryBackend::new();
                let cache = Mutex::new(engine(&backend));
                let value = BenchValue::new("v", size);

                b.to_async(&rt).iter(|| async {
                    cache
                        .lock()
                        .await
                        .set(black_box("k"), black_box(&value), "bench", 0)
                        .await
                });
            });
    }

    // Multi-get of 50 keys, half already known locally
    group.bench_function("get_multiple_50", |b| {
        let backend = InMemoryBackend::new();
        let keys: Vec<u32> = (0..50).collect();
        rt.block_on(async {
            let mut seed = engine(&backend);
            let items: Vec<(u32, u32)> = keys.iter().map(|&k| (k, k)).collect();
            seed.set_multiple(&items, "bench", 0)
                .await
                .expect("Failed to populate cache");
        });

        b.to_async(&rt).iter(|| async {
            let mut cache = engine(&backend);
            cache
                .get_multiple::<u32, _>(&keys[..25], "bench", false)
                .await
                .expect("Failed to get");
            cache
                .get_multiple::<u32, _>(black_box(&keys), "bench", false)
                .await
        });
    });

    // Random reads over 100 keys, half of them present in the backend
    group.bench_function("get_random_mixed", |b| {
        let backend = InMemoryBackend::new();
        rt.block_on(async {
            let mut seed = engine(&backend);
            let items: Vec<(u32, u32)> = (0..50).map(|k| (k * 2, k)).collect();
            seed.set_multiple(&items, "bench", 0)
                .await
                .expect("Failed to populate cache");
        });
        let cache = Mutex::new(engine(&backend));

        b.to_async(&rt).iter(|| async {
            let key: u32 = rand::rng().random_range(0..100);
            cache
                .lock()
                .await
                .get::<u32, _>(black_box(key), "bench", false)
                .await
        });
    });

    group.finish();
}

// ============================================================================
// Group 3: Key Derivation and Encoding Benchmarks
// ============================================================================

fn key_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");
    let codec = KeyCodec::new("1").with_salt("bench").with_binary_transport(false);
    let mut groups = GroupRegistry::new();
    groups.add_global(["users"]);

    group.bench_function("short", |b| {
        b.iter(|| codec.resolve(black_box(&"alloptions"), "options", &groups, false));
    });

    let long = "k".repeat(400);
    group.bench_function("truncated", |b| {
        b.iter(|| codec.resolve(black_box(&long), "posts", &groups, false));
    });

    group.finish();
}

fn serialization_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    for size in [100, 1_000, 10_000, 100_000].iter() {
        let value = BenchValue::new("test_id", *size);

        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("encode", size), &value, |b, value| {
                b.iter(|| encode(black_box(value)));
            });

        let payload = encode(&value).expect("Failed to encode");
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("decode", size), &payload, |b, payload| {
                b.iter(|| decode::<BenchValue>(black_box(payload)));
            });
    }

    group.bench_function("encode_integer", |b| {
        b.iter(|| encode(black_box(&123_456_i64)));
    });

    group.finish();
}

// ============================================================================
// Benchmark Registration
// ============================================================================

criterion_group!(
    benches,
    inmemory_benchmarks,
    engine_benchmarks,
    key_benchmarks,
    serialization_benchmarks
);
criterion_main!(benches);
