//! Symmetric frame playback, restoring a `World` step-by-step per
//! `SPEC_FULL.md` §4.11's six-step order.
//!
//! Grounded in `persistence/snapshot.rs`'s `SnapshotReader`, which read back
//! the same length-prefixed, compressed frame stream its writer counterpart
//! produced; restoration order here follows this crate's own ordering
//! invariant (destructions before new chunk data, headers before
//! managed-component sync).

use std::io::Read;

use crate::chunk::{CHUNK_BYTES, MANAGED_CHUNK_SLOTS};
use crate::codec::{NullCodec, ReflectiveCodec};
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::storage::ComponentStorage;
use crate::type_registry::ComponentId;
use crate::world::World;

use super::format::{self, FramePayload, ENTITY_INDEX_TYPE_ID, FRAME_KIND_KEYFRAME};

/// Raised when a post-playback audit finds a component table and an
/// entity's `component_mask` bit disagreeing about whether that component
/// is present (spec §9, "mask-vs-table drift"). Never aborts playback;
/// `component_mask` remains authoritative for all reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskDesync {
    pub entity_index: u32,
    pub component: ComponentId,
    pub mask_says_present: bool,
    pub table_says_present: bool,
}

/// Outcome of replaying one or more frames.
#[derive(Debug, Default)]
pub struct PlaybackSummary {
    pub frames_applied: u64,
    pub last_tick: u64,
    pub desyncs: Vec<MaskDesync>,
}

/// Replays FDPREC frames onto a `World`.
pub struct Playback {
    codec: Box<dyn ReflectiveCodec>,
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

impl Playback {
    pub fn new() -> Self {
        Self {
            codec: Box::new(NullCodec),
        }
    }

    pub fn with_codec(codec: Box<dyn ReflectiveCodec>) -> Self {
        Self { codec }
    }

    /// Reads and validates the file header, returning its creation
    /// timestamp.
    pub fn read_file_header<R: Read>(&self, reader: &mut R) -> Result<i64> {
        format::read_file_header(reader)
    }

    /// Applies every remaining frame in `reader` to `world`, in order.
    pub fn run<R: Read>(&self, reader: &mut R, world: &mut World) -> Result<PlaybackSummary> {
        let mut summary = PlaybackSummary::default();
        while let Some(frame) = self.read_one_frame(reader)? {
            self.apply_frame(world, &frame, &mut summary)?;
            summary.frames_applied += 1;
            summary.last_tick = frame.tick;
        }
        Ok(summary)
    }

    /// Applies exactly one frame read from `reader`, or returns `Ok(None)`
    /// (via `summary.frames_applied == 0`) at a clean end of stream.
    pub fn run_one<R: Read>(&self, reader: &mut R, world: &mut World) -> Result<Option<PlaybackSummary>> {
        let Some(frame) = self.read_one_frame(reader)? else {
            return Ok(None);
        };
        let mut summary = PlaybackSummary::default();
        self.apply_frame(world, &frame, &mut summary)?;
        summary.frames_applied = 1;
        summary.last_tick = frame.tick;
        Ok(Some(summary))
    }

    fn read_one_frame<R: Read>(&self, reader: &mut R) -> Result<Option<FramePayload>> {
        let Some((compressed_len, uncompressed_len, disk_tick, disk_kind)) =
            format::read_frame_disk_header(reader)?
        else {
            return Ok(None);
        };
        if compressed_len < 0 || uncompressed_len < 0 {
            return Err(EcsError::CorruptFrame(
                "negative length in frame disk header".to_string(),
            ));
        }
        let mut compressed = vec![0u8; compressed_len as usize];
        reader.read_exact(&mut compressed)?;
        let uncompressed = lz4_flex::block::decompress(&compressed, uncompressed_len as usize)
            .map_err(|e| EcsError::CorruptFrame(format!("lz4 decode failed: {e}")))?;
        let payload = FramePayload::decode(&uncompressed)?;
        if payload.tick != disk_tick || payload.kind != disk_kind {
            return Err(EcsError::CorruptFrame(
                "disk header tick/kind does not match compressed payload".to_string(),
            ));
        }
        Ok(Some(payload))
    }

    /// Step 1-6 of the restoration order (spec §4.11).
    fn apply_frame(&self, world: &mut World, frame: &FramePayload, summary: &mut PlaybackSummary) -> Result<()> {
        // 1. Set global_version; a keyframe additionally clears every
        // table and the entity index before restoring.
        if frame.kind == FRAME_KIND_KEYFRAME {
            self.clear_world(world);
        }
        world.set_global_version(frame.tick);

        // 2. Apply destructions.
        for entry in &frame.destroyed {
            let entity = Entity {
                index: entry.index,
                generation: entry.generation,
            };
            if world.is_alive(entity) {
                let _ = world.destroy_entity(entity);
            }
        }

        // 3. Inject events.
        for block in &frame.native_events {
            world
                .event_bus
                .inject_native_by_id(block.type_id, block.element_size.max(0) as usize, &block.bytes);
        }
        for block in &frame.managed_events {
            let target_id = world
                .event_bus
                .resolve_managed_type_name(&block.type_name)
                .unwrap_or(block.type_id);
            let mut cursor = &block.bytes[..];
            let mut values = Vec::with_capacity(block.count.max(0) as usize);
            for _ in 0..block.count.max(0) {
                if let Some(value) = self.codec.deserialize_object(target_id, &mut cursor)? {
                    values.push(value);
                }
            }
            world.event_bus.inject_managed_by_id(target_id, values);
        }

        // 4. Restore singletons.
        for blob in &frame.singletons {
            let type_id = blob.type_id as ComponentId;
            let mut cursor = &blob.bytes[..];
            if let Some(value) = self.codec.deserialize_object(type_id, &mut cursor)? {
                world.restore_singleton_raw(type_id, value);
            }
        }

        // 5. Apply chunk blobs. Unmanaged chunks restore bytes first, then
        // have their per-slot presence narrowed from the entity headers
        // restored above — headers always precede component chunks within
        // a frame's chunk list, so this lookup sees this frame's own data.
        for chunk in &frame.chunks {
            for comp in &chunk.comps {
                if comp.type_id == ENTITY_INDEX_TYPE_ID {
                    world.restore_header_chunk(chunk.chunk_id as usize, &comp.bytes);
                    continue;
                }
                let type_id = comp.type_id as ComponentId;
                let chunk_idx = chunk.chunk_id as usize;
                let is_managed = match world.table_mut_by_id(type_id) {
                    Some(storage) => storage.element_size() == 0,
                    None => continue,
                };
                if is_managed {
                    let storage = world.table_mut_by_id(type_id).expect("checked above");
                    self.restore_managed_chunk(storage.as_mut(), type_id, chunk_idx, &comp.bytes, frame.tick)?;
                } else {
                    let per_chunk = {
                        let storage = world.table_mut_by_id(type_id).expect("checked above");
                        slots_per_chunk(storage.as_ref())
                    };
                    let storage = world.table_mut_by_id(type_id).expect("checked above");
                    let _ = storage.restore_chunk(chunk_idx, &comp.bytes);

                    let presence = chunk_presence(world, type_id, chunk_idx, per_chunk);
                    let storage = world.table_mut_by_id(type_id).expect("checked above");
                    storage.mark_presence(chunk_idx, &presence);
                }
            }
        }

        // 6. Rebuild entity-index metadata.
        world.rebuild_entity_metadata();

        self.audit_mask_desync(world, summary);
        Ok(())
    }

    fn clear_world(&self, world: &mut World) {
        world.clear_all_for_keyframe();
    }

    /// Symmetric counterpart to `capture_managed_chunk`: decodes `per_chunk`
    /// sequential codec-serialized slots and writes each non-null one back
    /// through `set_raw_object`.
    fn restore_managed_chunk(
        &self,
        storage: &mut dyn ComponentStorage,
        type_id: ComponentId,
        chunk_idx: usize,
        bytes: &[u8],
        tick: u64,
    ) -> Result<()> {
        let per_chunk = MANAGED_CHUNK_SLOTS;
        let base = (chunk_idx * per_chunk) as u32;
        let mut cursor = bytes;
        storage.ensure_capacity(base + per_chunk as u32 - 1);
        for offset in 0..per_chunk as u32 {
            if let Some(value) = self.codec.deserialize_object(type_id, &mut cursor)? {
                let _ = storage.set_raw_object(base + offset, value, tick);
            } else {
                storage.clear_slot(base + offset);
            }
        }
        Ok(())
    }

    /// Post-playback audit for the `component_mask`-vs-table drift
    /// diagnostic (spec §9). Reports, never repairs: `component_mask`
    /// remains authoritative for every read path.
    fn audit_mask_desync(&self, world: &World, summary: &mut PlaybackSummary) {
        let component_count = world.type_registry().count() as u8;
        for index in 0..world.entities().max_issued() {
            let Some(header) = world.entities().get_header(index) else {
                continue;
            };
            if !header.is_active() {
                continue;
            }
            for component in 0..component_count {
                let mask_present = header.component_mask.test(component);
                let table_present = world
                    .table(component)
                    .map(|t| t.get_raw(index).is_some() || t.get_raw_object(index).is_some())
                    .unwrap_or(false);
                if mask_present != table_present {
                    log::warn!(
                        "mask/table desync: entity {index} component {component} mask={mask_present} table={table_present}"
                    );
                    summary.desyncs.push(MaskDesync {
                        entity_index: index,
                        component,
                        mask_says_present: mask_present,
                        table_says_present: table_present,
                    });
                }
            }
        }
    }
}

/// Mirrors `writer.rs`'s own `slots_per_chunk`: `element_size() == 0` marks
/// managed storage, which chunks by slot count rather than byte budget.
fn slots_per_chunk(storage: &dyn ComponentStorage) -> usize {
    let element_size = storage.element_size();
    if element_size == 0 {
        MANAGED_CHUNK_SLOTS
    } else {
        (CHUNK_BYTES / element_size).max(1)
    }
}

/// Per-slot presence for one unmanaged chunk, read from the entity headers
/// already restored by this same frame (spec §4.5: presence is
/// authoritative from `component_mask`).
fn chunk_presence(world: &World, component: ComponentId, chunk_idx: usize, per_chunk: usize) -> Vec<bool> {
    let base = (chunk_idx * per_chunk) as u32;
    (0..per_chunk as u32)
        .map(|offset| {
            world
                .entities()
                .get_header(base + offset)
                .map(|h| h.is_active() && h.component_mask.test(component))
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::writer::Recorder;

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn keyframe_round_trips_entities_and_components() {
        let mut world = World::new();
        world.register_component::<Position>().unwrap();
        let e = world.create_entity();
        world.set(e, Position { x: 1.0, y: 2.0 }).unwrap();
        world.tick();

        let recorder = Recorder::default();
        let mut buf = Vec::new();
        recorder.write_file_header(&mut buf, 0).unwrap();
        recorder.write_keyframe(&mut world, &mut buf).unwrap();

        let mut target = World::new();
        target.register_component::<Position>().unwrap();
        let playback = Playback::new();
        let mut cursor = &buf[..];
        playback.read_file_header(&mut cursor).unwrap();
        let summary = playback.run(&mut cursor, &mut target).unwrap();

        assert_eq!(summary.frames_applied, 1);
        assert!(target.is_alive(e));
        assert_eq!(*target.get_ro::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
        assert!(summary.desyncs.is_empty());
    }

    #[test]
    fn heterogeneous_component_sets_sharing_a_chunk_audit_clean() {
        let mut world = World::new();
        world.register_component::<Position>().unwrap();
        let with_position = world.create_entity();
        world.set(with_position, Position { x: 1.0, y: 2.0 }).unwrap();
        let without_position = world.create_entity();
        world.tick();

        let recorder = Recorder::default();
        let mut buf = Vec::new();
        recorder.write_file_header(&mut buf, 0).unwrap();
        recorder.write_keyframe(&mut world, &mut buf).unwrap();

        let mut target = World::new();
        target.register_component::<Position>().unwrap();
        let playback = Playback::new();
        let mut cursor = &buf[..];
        playback.read_file_header(&mut cursor).unwrap();
        let summary = playback.run(&mut cursor, &mut target).unwrap();

        assert!(target.has::<Position>(with_position));
        assert!(!target.has::<Position>(without_position));
        assert!(
            summary.desyncs.is_empty(),
            "unexpected mask/table desyncs: {:?}",
            summary.desyncs
        );
    }
}
