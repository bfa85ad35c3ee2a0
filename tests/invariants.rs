use bytemuck::{Pod, Zeroable};
use flightdeck_ecs::World;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Marker(u32);

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Owned(u32);

#[derive(Debug, Clone, Copy)]
enum Op {
    Create,
    Destroy(usize),
    Tick,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        2 => (0usize..32).prop_map(Op::Destroy),
        1 => Just(Op::Tick),
    ]
}

proptest! {
    /// Every live entity's generation, once observed, never decreases, and
    /// destroying then recreating the same slot strictly increases it.
    #[test]
    fn generation_is_monotonic_per_slot(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let mut world = World::new();
        let mut live: Vec<_> = Vec::new();
        let mut max_generation_seen: std::collections::HashMap<u32, u16> = std::collections::HashMap::new();

        for op in ops {
            match op {
                Op::Create => {
                    let e = world.create_entity();
                    let prev = max_generation_seen.get(&e.index).copied().unwrap_or(0);
                    prop_assert!(e.generation as u16 >= prev || prev == 0);
                    max_generation_seen.insert(e.index, e.generation);
                    live.push(e);
                }
                Op::Destroy(i) => {
                    if !live.is_empty() {
                        let idx = i % live.len();
                        let e = live.remove(idx);
                        let _ = world.destroy_entity(e);
                    }
                }
                Op::Tick => {
                    world.tick();
                }
            }
        }

        for e in &live {
            prop_assert!(world.is_alive(*e));
        }
    }

    /// `tick()` always advances `global_version` by exactly one, regardless
    /// of interleaved entity churn.
    #[test]
    fn tick_always_advances_by_one(tick_count in 0u32..50) {
        let mut world = World::new();
        let mut expected = world.global_version();
        for _ in 0..tick_count {
            let before = world.global_version();
            world.create_entity();
            let after = world.tick();
            prop_assert_eq!(after, before + 1);
            expected += 1;
        }
        prop_assert_eq!(world.global_version(), expected);
    }

    /// Setting authority without the component present is rejected, and the
    /// component mask is never observed set while the authority mask is set
    /// for a bit the component mask lacks.
    #[test]
    fn authority_mask_is_subset_of_component_mask(
        set_marker in any::<bool>(),
        set_owned in any::<bool>(),
        owned_true in any::<bool>(),
    ) {
        let mut world = World::new();
        world.register_component::<Marker>().unwrap();
        world.register_component::<Owned>().unwrap();
        let e = world.create_entity();

        if set_marker {
            world.set(e, Marker(1)).unwrap();
        }
        if set_owned {
            world.set(e, Owned(2)).unwrap();
            if set_owned {
                let _ = world.set_authority::<Owned>(e, owned_true);
            }
        }

        let has_owned = world.has::<Owned>(e);
        if !has_owned {
            prop_assert!(world.set_authority::<Owned>(e, true).is_err());
        }
    }

    /// A query built with `with_id(a)` never matches an entity lacking
    /// component `a`, across arbitrary creation/attachment sequences.
    #[test]
    fn query_with_id_never_matches_missing_component(
        attach_flags in prop::collection::vec(any::<bool>(), 1..40)
    ) {
        let mut world = World::new();
        let marker = world.register_component::<Marker>().unwrap();
        let mut entities = Vec::new();
        for attach in &attach_flags {
            let e = world.create_entity();
            if *attach {
                world.set(e, Marker(0)).unwrap();
            }
            entities.push((e, *attach));
        }

        let query = world.query().with_id(marker).build();
        for (e, attach) in &entities {
            if !*attach {
                prop_assert!(!query.any(&world) || world.get_ro::<Marker>(*e).is_err());
            }
        }
        let expected = entities.iter().filter(|(_, a)| *a).count();
        prop_assert_eq!(query.count(&world), expected);
    }
}
