use criterion::{black_box, criterion_group, criterion_main, Criterion};

use glam::{Mat4, Vec3};

use splatkd::math::Frustum;
use splatkd::surfel::{Surfel, SurfelBatch};
use splatkd::tree::{KdTree, TreeBuilder, DEFAULT_ERROR_THRESHOLD};

fn test_cloud(n: usize) -> Vec<Surfel> {
    // Deterministic pseudo-random cloud in a 100-unit cube
    let mut seed = 0x2545f491u32;
    let mut next = || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        (seed >> 8) as f32 / (1 << 24) as f32
    };
    (0..n)
        .map(|i| {
            let position = Vec3::new(next(), next(), next()) * 100.0;
            Surfel {
                position,
                radius: 0.5 + next(),
                normal: Vec3::new(next() - 0.5, next() - 0.5, next() - 0.5)
                    .try_normalize()
                    .unwrap_or(Vec3::Z),
                color: [i as u8, (i >> 8) as u8, 64],
            }
        })
        .collect()
}

fn build_tree(n: usize) -> KdTree {
    TreeBuilder::new()
        .build(&test_cloud(n))
        .unwrap()
        .into_tree()
        .unwrap()
}

fn bench_build_50k(c: &mut Criterion) {
    let surfels = test_cloud(50_000);
    c.bench_function("build_50k", |b| {
        b.iter(|| TreeBuilder::new().build(black_box(&surfels)))
    });
}

fn bench_query_frustum_50k(c: &mut Criterion) {
    let tree = build_tree(50_000);
    let eye = Vec3::new(50.0, 50.0, 260.0);
    let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 1000.0);
    let view = Mat4::look_at_rh(eye, Vec3::splat(50.0), Vec3::Y);
    let frustum = Frustum::from_view_projection(&(proj * view));

    let mut batch = SurfelBatch::new();
    c.bench_function("query_frustum_50k", |b| {
        b.iter(|| {
            batch.clear();
            tree.query_frustum(
                black_box(&frustum),
                black_box(eye),
                DEFAULT_ERROR_THRESHOLD,
                None,
                &mut batch,
            );
            batch.len()
        })
    });
}

fn bench_query_level_50k(c: &mut Criterion) {
    let tree = build_tree(50_000);
    let mut batch = SurfelBatch::new();
    c.bench_function("query_level_50k", |b| {
        b.iter(|| {
            batch.clear();
            tree.query_level(black_box(6), None, &mut batch);
            batch.len()
        })
    });
}

fn bench_intersect_50k(c: &mut Criterion) {
    let tree = build_tree(50_000);
    c.bench_function("intersect_50k", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = i.wrapping_add(1);
            let origin = Vec3::new((i % 97) as f32, (i % 89) as f32, -10.0);
            tree.intersect(black_box(origin), black_box(Vec3::Z))
        })
    });
}

fn bench_query_neighbors_50k(c: &mut Criterion) {
    let tree = build_tree(50_000);
    c.bench_function("query_neighbors_50k", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            tree.query_neighbors(black_box(Vec3::splat(50.0)), black_box(5.0), |_| hits += 1);
            hits
        })
    });
}

criterion_group!(
    benches,
    bench_build_50k,
    bench_query_frustum_50k,
    bench_query_level_50k,
    bench_intersect_50k,
    bench_query_neighbors_50k
);
criterion_main!(benches);
