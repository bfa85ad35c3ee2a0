use bytemuck::{Pod, Zeroable};
use flightdeck_ecs::{CommandBuffer, EcsError, Phase, World};

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Health(u32);

#[test]
fn create_attach_and_query_round_trips() {
    let mut world = World::new();
    let position = world.register_component::<Position>().unwrap();
    let health = world.register_component::<Health>().unwrap();

    let e1 = world.create_entity();
    world.set(e1, Position { x: 1.0, y: 2.0 }).unwrap();
    world.set(e1, Health(100)).unwrap();

    let e2 = world.create_entity();
    world.set(e2, Position { x: 3.0, y: 4.0 }).unwrap();

    let with_health = world.query().with_id(position).with_id(health).build();
    assert_eq!(with_health.count(&world), 1);
    assert_eq!(with_health.first_or_null(&world), e1);

    assert_eq!(*world.get_ro::<Position>(e1).unwrap(), Position { x: 1.0, y: 2.0 });
    assert!(!world.has::<Health>(e2));
}

#[test]
fn destroy_bumps_generation_and_invalidates_old_handle() {
    let mut world = World::new();
    world.register_component::<Position>().unwrap();
    let e = world.create_entity();
    world.set(e, Position { x: 0.0, y: 0.0 }).unwrap();

    world.destroy_entity(e).unwrap();
    assert!(!world.is_alive(e));
    assert!(matches!(world.get_ro::<Position>(e), Err(EcsError::StaleHandle { .. })));

    let reused = world.create_entity();
    assert_eq!(reused.index, e.index);
    assert_ne!(reused.generation, e.generation);
}

#[test]
fn query_filters_respect_include_exclude() {
    let mut world = World::new();
    let position = world.register_component::<Position>().unwrap();
    let health = world.register_component::<Health>().unwrap();

    let hurt = world.create_entity();
    world.set(hurt, Position { x: 0.0, y: 0.0 }).unwrap();
    world.set(hurt, Health(10)).unwrap();

    let healthy = world.create_entity();
    world.set(healthy, Position { x: 0.0, y: 0.0 }).unwrap();
    world.set(healthy, Health(100)).unwrap();

    let query = world.query().with_id(position).without_id(health).build();
    assert_eq!(query.count(&world), 0);

    let query_all_positions = world.query().with_id(position).build();
    assert_eq!(query_all_positions.count(&world), 2);
}

#[test]
fn phase_gate_rejects_unowned_writes_during_simulation() {
    let mut world = World::new();
    world.register_component::<Health>().unwrap();
    let e = world.create_entity();
    world.set(e, Health(1)).unwrap();
    world.set_authority::<Health>(e, false).unwrap();

    world.set_phase(Phase::Input).unwrap();
    world.set_phase(Phase::Simulation).unwrap();
    let err = world.set(e, Health(2)).unwrap_err();
    assert!(matches!(err, EcsError::WrongPhase { .. }));

    world.set_authority::<Health>(e, true).unwrap();
    world.set(e, Health(3)).unwrap();
    assert_eq!(world.get_ro::<Health>(e).unwrap(), &Health(3));
}

#[test]
fn set_phase_rejects_a_transition_outside_the_cycle() {
    let mut world = World::new();
    let err = world.set_phase(Phase::PostSimulation).unwrap_err();
    assert!(matches!(err, EcsError::IllegalPhaseTransition { .. }));

    // The linear cycle still lets the legal single steps through.
    world.set_phase(Phase::Input).unwrap();
    world.set_phase(Phase::Simulation).unwrap();
    world.set_phase(Phase::PostSimulation).unwrap();
    assert_eq!(world.phase(), Phase::PostSimulation);
}

#[test]
fn command_buffer_playback_sets_component_mask() {
    let mut world = World::new();
    let position = world.register_component::<Position>().unwrap();

    let mut commands = CommandBuffer::new();
    let placeholder = commands.create_entity();
    commands
        .add_component(placeholder, position, Position { x: 5.0, y: 6.0 })
        .unwrap();
    commands.playback(&mut world);

    let created = world
        .query()
        .with_id(position)
        .build()
        .first_or_null(&world);
    assert!(!created.is_null());
    assert_eq!(*world.get_ro::<Position>(created).unwrap(), Position { x: 5.0, y: 6.0 });
}

#[test]
fn event_bus_publish_is_invisible_until_swap() {
    let mut world = World::new();
    world.event_bus.publish(Health(7)).unwrap();
    assert!(world.event_bus.consume::<Health>().unwrap().is_empty());
    world.event_bus.swap_buffers();
    let read = world.event_bus.consume::<Health>().unwrap();
    assert_eq!(read.as_slice(), &[Health(7)]);
}

#[test]
fn tick_advances_global_version_by_exactly_one() {
    let mut world = World::new();
    let before = world.global_version();
    let after = world.tick();
    assert_eq!(after, before + 1);
    assert_eq!(world.global_version(), before + 1);
}
