use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use zcache_core::{Config, DeviceConfig, MockZonedBackend, PolicyKind, Tunables};
use zcache_engine::Cache;

fn bench_config() -> Config {
    Config {
        device: DeviceConfig {
            path: None,
            num_zones: 64,
            zone_size_bytes: 256 * 1024,
            zone_capacity_bytes: 256 * 1024,
            chunk_size_bytes: 4096,
        },
        tunables: Tunables {
            policy: PolicyKind::Chunk,
            max_open_zones: 8,
            evict_low_thresh_chunks: 256,
            evict_high_thresh_chunks: 512,
            ..Tunables::default()
        },
    }
}

fn warm_cache(cache: &Cache, ids: u32) {
    let random = zcache_core::payload::random_buffer(4096);
    for id in 0..ids {
        cache.get(id, &random).unwrap();
    }
}

fn bench_hot_path(c: &mut Criterion) {
    let cfg = bench_config();
    let device = Arc::new(MockZonedBackend::new(cfg.device.geometry()));
    let cache = Cache::init(&cfg, device);
    warm_cache(&cache, 512);
    let random = zcache_core::payload::random_buffer(4096);

    c.bench_function("get_hit", |b| {
        b.iter(|| {
            let data = cache.get(black_box(0), &random).unwrap();
            black_box(data);
        })
    });

    let mut next_id = 512u32;
    c.bench_function("get_miss", |b| {
        b.iter(|| {
            let data = cache.get(black_box(next_id), &random).unwrap();
            next_id += 1;
            black_box(data);
        })
    });
}

criterion_group!(benches, bench_hot_path);
criterion_main!(benches);
