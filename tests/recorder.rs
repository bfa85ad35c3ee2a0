use bytemuck::{Pod, Zeroable};
use flightdeck_ecs::{Playback, Recorder, World};

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Tag(u32);

#[test]
fn delta_after_keyframe_carries_only_new_writes() {
    let mut world = World::new();
    let position = world.register_component::<Position>().unwrap();

    let e1 = world.create_entity();
    world.set(e1, Position { x: 1.0, y: 1.0 }).unwrap();
    world.tick();

    let recorder = Recorder::default();
    let mut buf = Vec::new();
    recorder.write_file_header(&mut buf, 0).unwrap();
    recorder.write_keyframe(&mut world, &mut buf).unwrap();
    let after_keyframe_tick = world.global_version();

    let e2 = world.create_entity();
    world.set(e2, Position { x: 2.0, y: 2.0 }).unwrap();
    world.tick();
    recorder
        .write_delta(&mut world, &mut buf, after_keyframe_tick)
        .unwrap();

    let mut target = World::new();
    target.register_component::<Position>().unwrap();
    let playback = Playback::new();
    let mut cursor = &buf[..];
    playback.read_file_header(&mut cursor).unwrap();
    let summary = playback.run(&mut cursor, &mut target).unwrap();

    assert_eq!(summary.frames_applied, 2);
    assert!(target.is_alive(e1));
    assert!(target.is_alive(e2));
    assert_eq!(*target.get_ro::<Position>(e1).unwrap(), Position { x: 1.0, y: 1.0 });
    assert_eq!(*target.get_ro::<Position>(e2).unwrap(), Position { x: 2.0, y: 2.0 });
    assert!(summary.desyncs.is_empty());
}

#[test]
fn destroyed_entities_are_removed_on_playback() {
    let mut world = World::new();
    world.register_component::<Tag>().unwrap();
    let e1 = world.create_entity();
    world.set(e1, Tag(1)).unwrap();
    let e2 = world.create_entity();
    world.set(e2, Tag(2)).unwrap();
    world.tick();

    let recorder = Recorder::default();
    let mut buf = Vec::new();
    recorder.write_file_header(&mut buf, 0).unwrap();
    recorder.write_keyframe(&mut world, &mut buf).unwrap();

    let mut target = World::new();
    target.register_component::<Tag>().unwrap();
    let playback = Playback::new();
    let mut cursor = &buf[..];
    playback.read_file_header(&mut cursor).unwrap();
    playback.run(&mut cursor, &mut target).unwrap();
    assert!(target.is_alive(e1));
    assert!(target.is_alive(e2));

    world.destroy_entity(e1).unwrap();
    world.tick();
    let since = target.global_version();
    let mut delta_buf = Vec::new();
    recorder.write_delta(&mut world, &mut delta_buf, since).unwrap();
    let mut delta_cursor = &delta_buf[..];
    playback.run(&mut delta_cursor, &mut target).unwrap();

    assert!(!target.is_alive(e1));
    assert!(target.is_alive(e2));
}
