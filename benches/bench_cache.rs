use archetype_pipeline::resources::{MemoryBudget, RawResource, Resource, ResourceCache};
use archetype_pipeline::AssetId;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

const KB: usize = 1024;

fn ids(count: usize) -> Vec<AssetId> {
    (0..count).map(|i| AssetId::from(format!("asset_{i}"))).collect()
}

fn bench_put_within_budget(c: &mut Criterion) {
    let keys = ids(1000);
    c.bench_function("cache_put_1000_no_eviction", |b| {
        b.iter(|| {
            let cache = ResourceCache::new(MemoryBudget::new(64 * 1024 * KB, 90));
            for id in &keys {
                let resource: Arc<dyn Resource> = Arc::new(RawResource::new(id.clone(), Vec::new()));
                cache.put(id.clone(), resource, 16 * KB).ok();
            }
            black_box(cache.memory_usage())
        })
    });
}

fn bench_put_with_eviction(c: &mut Criterion) {
    let keys = ids(1000);
    let mut group = c.benchmark_group("cache_put_evicting");
    for pinned_every in [0usize, 4, 2] {
        group.bench_with_input(
            BenchmarkId::from_parameter(pinned_every),
            &pinned_every,
            |b, &pinned_every| {
                b.iter(|| {
                    // Room for roughly 100 entries
                    let cache = ResourceCache::new(MemoryBudget::new(1600 * KB, 100));
                    let mut held = Vec::new();
                    for (i, id) in keys.iter().enumerate() {
                        let resource: Arc<dyn Resource> =
                            Arc::new(RawResource::new(id.clone(), Vec::new()));
                        if pinned_every > 0 && i % pinned_every == 0 && held.len() < 50 {
                            held.push(Arc::clone(&resource));
                        }
                        cache.put(id.clone(), resource, 16 * KB).ok();
                    }
                    black_box(cache.stats().total_evictions)
                })
            },
        );
    }
    group.finish();
}

fn bench_get_hits(c: &mut Criterion) {
    let keys = ids(1000);
    let cache = ResourceCache::new(MemoryBudget::new(64 * 1024 * KB, 90));
    for id in &keys {
        cache
            .put(id.clone(), Arc::new(RawResource::new(id.clone(), Vec::new())), 16 * KB)
            .ok();
    }

    c.bench_function("cache_get_1000_hits", |b| {
        b.iter(|| {
            for id in &keys {
                black_box(cache.get(id));
            }
        })
    });
}

criterion_group!(benches, bench_put_within_budget, bench_put_with_eviction, bench_get_hits);
criterion_main!(benches);
