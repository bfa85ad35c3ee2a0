//! Basic usage example for flightdeck-ecs.
//! Creates entities, queries them by component mask, and records a delta
//! frame to a file.

use flightdeck_ecs::{Phase, RecorderConfig, Recorder, World};

#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Velocity {
    dx: f32,
    dy: f32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut world = World::new();
    let position = world.register_component::<Position>()?;
    let velocity = world.register_component::<Velocity>()?;

    world.set_phase(Phase::Initialization)?;
    for i in 0..5 {
        let entity = world.create_entity();
        world.set(entity, Position { x: i as f32, y: 0.0 })?;
        if i % 2 == 0 {
            world.set(entity, Velocity { dx: 1.0, dy: 0.0 })?;
        }
    }
    world.tick();

    let moving = world.query().with_id(position).with_id(velocity).build();
    println!("entities with position+velocity: {}", moving.count(&world));
    moving.for_each(&world, |entity| {
        let pos = world.get_ro::<Position>(entity).unwrap();
        println!("  entity {} at ({}, {})", entity.index, pos.x, pos.y);
    });

    let recorder = Recorder::new(RecorderConfig::default());
    let mut buf = Vec::new();
    recorder.write_file_header(&mut buf, 0)?;
    recorder.write_keyframe(&mut world, &mut buf)?;
    println!("keyframe encoded to {} bytes", buf.len());

    Ok(())
}
