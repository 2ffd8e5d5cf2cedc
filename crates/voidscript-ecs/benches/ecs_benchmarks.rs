//! Storage and query benchmarks.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use voidscript_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Velocity {
    dx: f64,
    dy: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health(u32);

fn setup_world(entity_count: usize) -> (World, Vec<Entity>) {
    let mut world = World::new();
    world.register_component::<Position>("Position");
    world.register_component::<Velocity>("Velocity");
    world.register_component::<Health>("Health");

    let entities = (0..entity_count)
        .map(|i| {
            let mut bundle = ComponentBundle::new().with(Position { x: i as f64, y: 0.0 });
            if i % 2 == 0 {
                bundle.add(Velocity { dx: 1.0, dy: 0.5 });
            }
            if i % 3 == 0 {
                bundle.add(Health(100));
            }
            world.spawn_bundle(bundle).expect("registered components")
        })
        .collect();
    (world, entities)
}

fn bench_spawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");
    for &n in &[1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(setup_world(n)));
        });
    }
    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    for &n in &[1_000usize, 10_000] {
        let (mut world, _) = setup_world(n);
        group.bench_with_input(BenchmarkId::new("read", n), &n, |b, _| {
            b.iter(|| {
                let mut sum = 0.0;
                world.query::<(&Position, &Velocity)>().each(|_, (p, v)| sum += p.x * v.dx);
                black_box(sum)
            });
        });
        group.bench_with_input(BenchmarkId::new("write", n), &n, |b, _| {
            b.iter(|| {
                world
                    .query_mut::<(&mut Position, &Velocity)>()
                    .each(|_, (p, v)| {
                        p.x += v.dx;
                        p.y += v.dy;
                    });
            });
        });
    }
    group.finish();
}

fn bench_filters(c: &mut Criterion) {
    let (world, _) = setup_world(10_000);
    let registry = world.registry();
    let filter = QueryFilter::new()
        .all_named(registry, &["Position"])
        .none_named(registry, &["Health"]);
    c.bench_function("filter/matching_entities", |b| {
        b.iter(|| black_box(world.matching_entities(&filter).len()));
    });
}

fn bench_command_apply(c: &mut Criterion) {
    c.bench_function("commands/apply_1000_sets", |b| {
        let (mut world, entities) = setup_world(1_000);
        b.iter(|| {
            let mut buf = CommandBuffer::new();
            for (i, &e) in entities.iter().enumerate() {
                buf.set_component(e, "Health", json!(i as u32));
            }
            black_box(buf.apply(&mut world).len())
        });
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let (world, entities) = setup_world(1_000);
    c.bench_function("snapshot/capture_entity", |b| {
        b.iter(|| black_box(world.capture_entity(entities[0]).map(|s| s.len())));
    });
}

criterion_group!(
    benches,
    bench_spawn,
    bench_query,
    bench_filters,
    bench_command_apply,
    bench_snapshot
);
criterion_main!(benches);
