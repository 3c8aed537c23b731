use archetype_pipeline::config::OctreeConfig;
use archetype_pipeline::math::{Aabb, Frustum, Sphere, Vec3};
use archetype_pipeline::scene::{EntityId, Octree};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use slotmap::SlotMap;

fn scatter(count: usize) -> Vec<(EntityId, Aabb)> {
    let mut keys = SlotMap::<EntityId, ()>::with_key();
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 40) as f32 / (1u64 << 24) as f32 * 200.0 - 100.0
    };
    (0..count)
        .map(|_| {
            let center = Vec3::new(next(), next(), next());
            (keys.insert(()), Aabb::from_center_half_extents(center, Vec3::splat(0.5)))
        })
        .collect()
}

fn world() -> Aabb {
    Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0))
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("octree_insert");
    for count in [1_000usize, 10_000] {
        let entries = scatter(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &entries, |b, entries| {
            b.iter(|| {
                let mut tree = Octree::new(world(), OctreeConfig::default());
                for (id, bounds) in entries {
                    tree.insert(*id, *bounds);
                }
                black_box(tree.len())
            })
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let entries = scatter(10_000);
    let mut tree = Octree::new(world(), OctreeConfig::default());
    for (id, bounds) in &entries {
        tree.insert(*id, *bounds);
    }

    let left = Frustum::from_aabb(&Aabb::new(Vec3::splat(-150.0), Vec3::new(0.0, 150.0, 150.0)));
    c.bench_function("octree_frustum_left_half_10k", |b| {
        b.iter(|| black_box(tree.query_frustum(&left).len()))
    });
    c.bench_function("brute_force_frustum_left_half_10k", |b| {
        b.iter(|| {
            black_box(
                entries
                    .iter()
                    .filter(|(_, bounds)| left.intersects_aabb(bounds))
                    .count(),
            )
        })
    });

    let sphere = Sphere::new(Vec3::new(10.0, -20.0, 5.0), 25.0);
    c.bench_function("octree_sphere_10k", |b| {
        b.iter(|| black_box(tree.query_sphere(&sphere).len()))
    });
}

fn bench_batch_update(c: &mut Criterion) {
    let entries = scatter(5_000);
    c.bench_function("octree_batch_move_5k", |b| {
        b.iter(|| {
            let mut tree = Octree::new(world(), OctreeConfig::default());
            for (id, bounds) in &entries {
                tree.insert(*id, *bounds);
            }
            tree.begin_batch_update();
            for (id, bounds) in &entries {
                let offset = Vec3::new(3.0, -2.0, 1.0);
                tree.update(*id, Aabb::new(bounds.min + offset, bounds.max + offset));
            }
            black_box(tree.end_batch_update())
        })
    });
}

criterion_group!(benches, bench_insert, bench_queries, bench_batch_update);
criterion_main!(benches);
