use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flightdeck_ecs::World;

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Velocity {
    dx: f32,
    dy: f32,
}

fn populated_world(count: u32) -> (World, u8, u8) {
    let mut world = World::new();
    let position = world.register_component::<Position>().unwrap();
    let velocity = world.register_component::<Velocity>().unwrap();
    for i in 0..count {
        let e = world.create_entity();
        world.set(e, Position { x: i as f32, y: 0.0 }).unwrap();
        if i % 2 == 0 {
            world.set(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
        }
    }
    (world, position, velocity)
}

fn bench_serial_for_each(c: &mut Criterion) {
    let (world, position, velocity) = populated_world(10_000);
    let query = world.query().with_id(position).with_id(velocity).build();
    c.bench_function("query_for_each_10k", |b| {
        b.iter(|| {
            let mut sum = 0u32;
            query.for_each(&world, |e| sum += black_box(e.index));
            black_box(sum);
        });
    });
}

fn bench_chunked_for_each(c: &mut Criterion) {
    let (world, position, velocity) = populated_world(10_000);
    let query = world.query().with_id(position).with_id(velocity).build();
    c.bench_function("query_for_each_chunked_10k", |b| {
        b.iter(|| {
            let mut sum = 0u32;
            query.for_each_chunked(&world, |e| sum += black_box(e.index));
            black_box(sum);
        });
    });
}

fn bench_count(c: &mut Criterion) {
    let (world, position, _velocity) = populated_world(10_000);
    let query = world.query().with_id(position).build();
    c.bench_function("query_count_10k", |b| {
        b.iter(|| black_box(query.count(&world)));
    });
}

criterion_group!(benches, bench_serial_for_each, bench_chunked_for_each, bench_count);
criterion_main!(benches);
