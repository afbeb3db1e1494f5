#![allow(dead_code)]

use chunk_ecs::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

#[derive(Debug, Clone, Copy)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Velocity(f32, f32, f32);

fn populated_store(n: usize) -> EntityStore {
    let mut store = EntityStore::new(EcsConfig::default());
    for i in 0..n {
        store.spawn((Position(i as f32, 0.0, 0.0), Velocity(1.0, 0.0, 0.0)));
    }
    store
}

fn bench_for_each(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_bench");

    group.bench_function("for_each_read_10k", |b| {
        let mut store = populated_store(10_000);
        b.iter(|| {
            let mut query = Query::new(&mut store).with::<Position>();
            let mut total = 0.0f32;
            query.for_each1::<R<Position>>(|_e, p| total += p.0);
            black_box(total);
        });
    });

    group.bench_function("for_each_write_10k", |b| {
        let mut store = populated_store(10_000);
        b.iter(|| {
            let mut query = Query::new(&mut store).with::<Position>().with::<Velocity>();
            query.for_each2::<R<Velocity>, W<Position>>(|_e, v, p| {
                p.0 += v.0;
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_for_each);
criterion_main!(benches);
