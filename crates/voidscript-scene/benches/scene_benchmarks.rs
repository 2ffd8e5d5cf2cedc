//! Save/load benchmarks.
//!
//! Run with: `cargo bench --bench scene_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use voidscript_scene::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Target {
    entity: Option<Entity>,
}

fn setup_world() -> World {
    let mut world = World::new();
    world.register_component::<Position>("Position");
    world
        .register(
            ComponentDescriptor::<Target>::new("Target")
                .config(ComponentConfig::new().property("entity", PropertyConfig::new().entity_ref()))
                .with_default(),
        )
        .expect("fresh registry");
    world
}

/// A root with `n` children, every other child targeting its predecessor.
fn build_tree(world: &mut World, n: usize) -> Entity {
    let root = world.spawn_with(Position { x: 0.0, y: 0.0 }).expect("registered");
    let mut previous = root;
    for i in 0..n {
        let mut bundle = ComponentBundle::new().with(Position { x: i as f64, y: 1.0 });
        if i % 2 == 0 {
            bundle.add(Target { entity: Some(previous) });
        }
        let child = world.spawn_bundle(bundle).expect("registered");
        world.add_child(root, child).expect("alive");
        previous = child;
    }
    root
}

fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_prefab");
    for &n in &[100usize, 1_000] {
        let mut world = setup_world();
        let root = build_tree(&mut world, n);
        let mut serializer = SceneSerializer::new(UuidSource::Seeded(1));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                black_box(
                    serializer
                        .save_prefab(&mut world, root, SaveOptions::default())
                        .expect("save"),
                )
            });
        });
    }
    group.finish();
}

fn bench_instantiate(c: &mut Criterion) {
    let mut group = c.benchmark_group("instantiate_prefab");
    for &n in &[100usize, 1_000] {
        let mut world = setup_world();
        let root = build_tree(&mut world, n);
        let mut serializer = SceneSerializer::new(UuidSource::Seeded(2));
        let prefab = serializer
            .save_prefab(&mut world, root, SaveOptions::default())
            .expect("save");
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter_with_setup(setup_world, |mut target| {
                black_box(serializer.instantiate_prefab(&mut target, &prefab).expect("load"))
            });
        });
    }
    group.finish();
}

fn bench_json(c: &mut Criterion) {
    let mut world = setup_world();
    let root = build_tree(&mut world, 1_000);
    let mut serializer = SceneSerializer::new(UuidSource::Seeded(3));
    let prefab = serializer
        .save_prefab(&mut world, root, SaveOptions::default())
        .expect("save");
    let text = prefab.to_json_string().expect("encode");

    c.bench_function("json/parse_1000", |b| {
        b.iter(|| black_box(PrefabAsset::from_json_str(black_box(&text)).expect("parse")))
    });
}

criterion_group!(benches, bench_save, bench_instantiate, bench_json);
criterion_main!(benches);
