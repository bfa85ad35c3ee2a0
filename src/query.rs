//! Immutable query filters and serial/chunked/parallel iteration
//! (spec §4.7).
//!
//! No single analogue answers lookups this way elsewhere in the pack — table
//! scans and archetype registries usually drive lookups directly rather than
//! through a bitmask-filtered builder — so this module is grounded in the
//! *shape* of `entity/archetype.rs`'s `ArchetypeMask` predicate logic,
//! generalized from one 64-bit lane to the full `BitMask256`, plus `rayon`
//! for the parallel iterator.

use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::entity::Entity;
use crate::mask::BitMask256;
use crate::world::World;

/// Baseline batch sizes per `ParallelHint`, before the `Light` adaptive
/// adjustment (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelHint {
    Light,
    Medium,
    Heavy,
    VeryHeavy,
}

impl ParallelHint {
    fn baseline_batch(self) -> usize {
        match self {
            ParallelHint::Light => 1024,
            ParallelHint::Medium => 256,
            ParallelHint::Heavy => 64,
            ParallelHint::VeryHeavy => 16,
        }
    }
}

/// An immutable filter over entity headers: component and authority
/// include/exclude masks plus an optional `(kind_mask, kind_value)`
/// predicate on `EntityHeader::kind_tag`.
#[derive(Debug, Clone)]
pub struct Query {
    include: BitMask256,
    exclude: BitMask256,
    auth_include: BitMask256,
    auth_exclude: BitMask256,
    kind_filter: Option<(u64, u64)>,
}

impl Query {
    pub fn matches(&self, component_mask: &BitMask256, authority_mask: &BitMask256, kind_tag: u64) -> bool {
        if !BitMask256::matches(component_mask, &self.include, &self.exclude) {
            return false;
        }
        if !BitMask256::matches(authority_mask, &self.auth_include, &self.auth_exclude) {
            return false;
        }
        if let Some((kind_mask, kind_value)) = self.kind_filter {
            if (kind_tag & kind_mask) != kind_value {
                return false;
            }
        }
        true
    }

    fn matching_indices(&self, world: &World) -> Vec<u32> {
        (0..world.entities().max_issued())
            .filter(|&index| {
                world
                    .entities()
                    .get_header(index)
                    .filter(|h| h.is_active())
                    .map(|h| self.matches(&h.component_mask, &h.authority_mask, h.kind_tag))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Linear scan over `[0, max_issued)` in strictly ascending index order.
    pub fn for_each(&self, world: &World, mut action: impl FnMut(Entity)) {
        for index in self.matching_indices(world) {
            let generation = world.entities().get_header_unchecked(index).generation;
            action(Entity { index, generation });
        }
    }

    /// Skips chunks with zero live population before visiting their slots.
    pub fn for_each_chunked(&self, world: &World, mut action: impl FnMut(Entity)) {
        use crate::entity::index::HEADER_CHUNK_CAPACITY;
        let chunk_count = world.entities().chunk_count();
        for chunk_idx in 0..chunk_count {
            if world.entities().chunk_live_population(chunk_idx) == 0 {
                continue;
            }
            let base = (chunk_idx * HEADER_CHUNK_CAPACITY) as u32;
            let end = base + HEADER_CHUNK_CAPACITY as u32;
            for index in base..end.min(world.entities().max_issued()) {
                if let Some(header) = world.entities().get_header(index) {
                    if header.is_active()
                        && self.matches(&header.component_mask, &header.authority_mask, header.kind_tag)
                    {
                        action(Entity { index, generation: header.generation });
                    }
                }
            }
        }
    }

    /// Splits matching entities into disjoint, ordered batches sized per
    /// `hint` and runs `action` over each batch in parallel. `action` must
    /// not mutate the world directly — only read components or enqueue
    /// commands into a thread-local `CommandBuffer` (spec §5).
    pub fn for_each_parallel(
        &self,
        world: &World,
        hint: ParallelHint,
        action: impl Fn(Entity) + Sync + Send,
    ) {
        let indices = self.matching_indices(world);
        let mut batch_size = hint.baseline_batch();
        if hint == ParallelHint::Light {
            let cores = rayon::current_num_threads().max(1);
            let adaptive = indices.len() / (cores * 2);
            batch_size = adaptive.clamp(512, 8192);
            if indices.len() < 1024 {
                // Fallback to serial below 1024 active entities for Light.
                for &index in &indices {
                    let generation = world.entities().get_header_unchecked(index).generation;
                    action(Entity { index, generation });
                }
                return;
            }
        }

        indices.par_chunks(batch_size.max(1)).for_each(|batch| {
            for &index in batch {
                let generation = world.entities().get_header_unchecked(index).generation;
                action(Entity { index, generation });
            }
        });
    }

    pub fn count(&self, world: &World) -> usize {
        self.matching_indices(world).len()
    }

    pub fn any(&self, world: &World) -> bool {
        (0..world.entities().max_issued()).any(|index| {
            world
                .entities()
                .get_header(index)
                .filter(|h| h.is_active())
                .map(|h| self.matches(&h.component_mask, &h.authority_mask, h.kind_tag))
                .unwrap_or(false)
        })
    }

    pub fn first_or_null(&self, world: &World) -> Entity {
        for index in 0..world.entities().max_issued() {
            if let Some(header) = world.entities().get_header(index) {
                if header.is_active()
                    && self.matches(&header.component_mask, &header.authority_mask, header.kind_tag)
                {
                    return Entity { index, generation: header.generation };
                }
            }
        }
        Entity::NULL
    }

    /// Matches entities whose header changed since `since`, or whose
    /// `include` set has a chunk covering that entity's own slot that
    /// changed since `since` (spec §4.7) — a narrower query than
    /// re-evaluating the whole mask predicate every frame. Only the chunk
    /// that actually holds the candidate's slot is checked per component,
    /// not every chunk in the table.
    pub fn query_delta(&self, world: &World, since: u64, mut action: impl FnMut(Entity)) {
        for index in self.matching_indices(world) {
            let header = world.entities().get_header_unchecked(index);
            let header_changed = header.last_change_tick > since;
            let table_changed = self.include.iter_set_bits().any(|id| {
                world
                    .table(id)
                    .map(|table| {
                        let chunk_idx = table.chunk_index_for_slot(index);
                        table.has_changes_since(chunk_idx, since)
                    })
                    .unwrap_or(false)
            });
            if header_changed || table_changed {
                action(Entity { index, generation: header.generation });
            }
        }
    }

    /// Resumes iteration from `next_index`, stopping once `budget` is
    /// exhausted. Returns the index to resume from on the next call, or
    /// `None` once the scan reached `max_issued`.
    pub fn query_time_sliced(
        &self,
        world: &World,
        next_index: u32,
        budget: TimeSliceBudget,
        mut action: impl FnMut(Entity),
    ) -> Option<u32> {
        let start = Instant::now();
        let mut processed = 0u32;
        let mut index = next_index;
        let max = world.entities().max_issued();
        while index < max {
            if let Some(header) = world.entities().get_header(index) {
                if header.is_active()
                    && self.matches(&header.component_mask, &header.authority_mask, header.kind_tag)
                {
                    action(Entity { index, generation: header.generation });
                    processed += 1;
                }
            }
            index += 1;
            let exhausted = match budget {
                TimeSliceBudget::WallClock(limit) => start.elapsed() >= limit,
                TimeSliceBudget::ProcessedCount(limit) => processed >= limit,
            };
            if exhausted {
                return Some(index);
            }
        }
        None
    }
}

/// Bounds the work done by `query_time_sliced` in one call.
#[derive(Debug, Clone, Copy)]
pub enum TimeSliceBudget {
    WallClock(Duration),
    ProcessedCount(u32),
}

/// Fluent builder that compiles down to an immutable `Query` (spec §4.7).
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    include: BitMask256,
    exclude: BitMask256,
    auth_include: BitMask256,
    auth_exclude: BitMask256,
    kind_filter: Option<(u64, u64)>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: u8) -> Self {
        self.include.set(id);
        self
    }

    pub fn without_id(mut self, id: u8) -> Self {
        self.exclude.set(id);
        self
    }

    pub fn with_authority_id(mut self, id: u8) -> Self {
        self.auth_include.set(id);
        self
    }

    pub fn without_authority_id(mut self, id: u8) -> Self {
        self.auth_exclude.set(id);
        self
    }

    pub fn with_kind(mut self, mask: u64, value: u64) -> Self {
        self.kind_filter = Some((mask, value));
        self
    }

    pub fn build(self) -> Query {
        Query {
            include: self.include,
            exclude: self.exclude,
            auth_include: self.auth_include,
            auth_exclude: self.auth_exclude,
            kind_filter: self.kind_filter,
        }
    }
}

impl World {
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
    #[repr(C)]
    struct A;
    #[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
    #[repr(C)]
    struct B;
    #[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
    #[repr(C)]
    struct C;

    fn setup() -> (World, u8, u8, u8) {
        let mut world = World::new();
        let a = world.register_component::<A>().unwrap();
        let b = world.register_component::<B>().unwrap();
        let c = world.register_component::<C>().unwrap();
        (world, a, b, c)
    }

    #[test]
    fn with_without_filters_count_correctly() {
        let (mut world, a, b, c) = setup();
        let e1 = world.create_entity();
        world.set(e1, A).unwrap();
        let e2 = world.create_entity();
        world.set(e2, A).unwrap();
        world.set(e2, B).unwrap();
        let e3 = world.create_entity();
        world.set(e3, A).unwrap();
        world.set(e3, B).unwrap();
        world.set(e3, C).unwrap();
        let e4 = world.create_entity();
        world.set(e4, B).unwrap();
        world.set(e4, C).unwrap();

        let query = world.query().with_id(a).with_id(b).without_id(c).build();
        assert_eq!(query.count(&world), 1);
    }

    #[test]
    fn query_delta_only_flags_the_slots_own_chunk() {
        // A wide element keeps slots-per-chunk small (64 KiB / 4096 bytes =
        // 16) so the test can cross a chunk boundary without creating
        // thousands of entities.
        #[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
        #[repr(C)]
        struct Wide {
            value: u32,
            _pad: [u8; 4092],
        }

        let mut world = World::new();
        let wide = world.register_component::<Wide>().unwrap();
        let per_chunk = crate::chunk::CHUNK_BYTES / std::mem::size_of::<Wide>();

        let first_chunk_entity = world.create_entity();
        world.set(first_chunk_entity, Wide { value: 0, _pad: [0; 4092] }).unwrap();
        for _ in 1..per_chunk {
            let filler = world.create_entity();
            world.set(filler, Wide { value: 0, _pad: [0; 4092] }).unwrap();
        }
        let second_chunk_entity = world.create_entity();
        world.set(second_chunk_entity, Wide { value: 0, _pad: [0; 4092] }).unwrap();
        world.tick();

        let since = world.global_version();
        world.set(second_chunk_entity, Wide { value: 1, _pad: [0; 4092] }).unwrap();
        world.tick();

        let query = world.query().with_id(wide).build();
        let mut touched = Vec::new();
        query.query_delta(&world, since, |e| touched.push(e.index));

        assert!(touched.contains(&second_chunk_entity.index));
        assert!(!touched.contains(&first_chunk_entity.index));
    }

    #[test]
    fn for_each_visits_in_ascending_order() {
        let (mut world, a, _, _) = setup();
        let mut created = Vec::new();
        for _ in 0..5 {
            let e = world.create_entity();
            world.set(e, A).unwrap();
            created.push(e);
        }
        let query = world.query().with_id(a).build();
        let mut seen = Vec::new();
        query.for_each(&world, |e| seen.push(e.index));
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
