#![allow(dead_code)]

use chunk_ecs::{EcsConfig, EntityStore};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

#[derive(Debug, Clone, Copy)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Health(u32);

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_bench");

    group.bench_function("spawn_2_components", |b| {
        let mut store = EntityStore::new(EcsConfig::default());
        b.iter(|| {
            for i in 0..1000 {
                black_box(store.spawn((Position(i as f32, 2.0, 3.0), Velocity(1.0, 0.0, 0.0))));
            }
        });
    });

    group.bench_function("spawn_3_components", |b| {
        let mut store = EntityStore::new(EcsConfig::default());
        b.iter(|| {
            for i in 0..1000 {
                black_box(store.spawn((Position(i as f32, 2.0, 3.0), Velocity(1.0, 0.0, 0.0), Health(100))));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
