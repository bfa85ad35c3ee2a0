use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flightdeck_ecs::{CommandBuffer, World};

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

fn bench_playback_creates(c: &mut Criterion) {
    let mut world = World::new();
    let position = world.register_component::<Position>().unwrap();

    c.bench_function("command_buffer_playback_1k_creates", |b| {
        b.iter(|| {
            let mut cb = CommandBuffer::new();
            for i in 0..1000 {
                let placeholder = cb.create_entity();
                cb.add_component(placeholder, position, Position { x: i as f32, y: 0.0 })
                    .unwrap();
            }
            cb.playback(&mut world);
            black_box(world.entities().active_count());
        });
    });
}

criterion_group!(benches, bench_playback_creates);
criterion_main!(benches);
