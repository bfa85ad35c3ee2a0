//! Delta/keyframe frame capture (spec §4.11).
//!
//! Grounded in `persistence/snapshot.rs`'s `SnapshotWriter`, which walked
//! the same dirty-chunk-by-version scheme over its table dispatch and wrote
//! a length-prefixed frame to a stream; this module keeps that two-phase
//! "build an in-memory payload, then compress and flush it" shape and swaps
//! its per-table schema for the entity/component/event/singleton layout
//! `SPEC_FULL.md` §4.11 defines.

use std::io::Write;

use crate::chunk::{CHUNK_BYTES, MANAGED_CHUNK_SLOTS};
use crate::codec::{NullCodec, ReflectiveCodec};
use crate::entity::index::HEADER_CHUNK_CAPACITY;
use crate::error::Result;
use crate::storage::ComponentStorage;
use crate::type_registry::ComponentId;
use crate::world::World;

use super::format::{
    self, ChunkBlob, DestroyedEntry, FramePayload, ManagedEventBlock, NativeEventBlock,
    RecorderConfig, TypedBlob, ENTITY_INDEX_TYPE_ID, FRAME_KIND_DELTA, FRAME_KIND_KEYFRAME,
};

/// Captures frames from a `World` into a caller-supplied byte stream.
pub struct Recorder {
    config: RecorderConfig,
    codec: Box<dyn ReflectiveCodec>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            codec: Box::new(NullCodec),
        }
    }

    pub fn with_codec(config: RecorderConfig, codec: Box<dyn ReflectiveCodec>) -> Self {
        Self { config, codec }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Writes the FDPREC file header. Call once before the first frame.
    pub fn write_file_header<W: Write>(&self, writer: &mut W, created_timestamp: i64) -> Result<()> {
        format::write_file_header(writer, created_timestamp)
    }

    /// Captures every active entity, component chunk, singleton, and event
    /// stream unconditionally.
    pub fn write_keyframe<W: Write>(&self, world: &mut World, writer: &mut W) -> Result<()> {
        let payload = self.build_payload(world, FRAME_KIND_KEYFRAME, 0)?;
        self.flush(writer, &payload)
    }

    /// Captures only what changed since `prev_tick`: destroyed entities,
    /// dirty header/component chunks, published events, and touched
    /// singletons.
    pub fn write_delta<W: Write>(&self, world: &mut World, writer: &mut W, prev_tick: u64) -> Result<()> {
        let payload = self.build_payload(world, FRAME_KIND_DELTA, prev_tick)?;
        self.flush(writer, &payload)
    }

    fn flush<W: Write>(&self, writer: &mut W, payload: &FramePayload) -> Result<()> {
        let uncompressed = payload.encode();
        let compressed = lz4_flex::block::compress(&uncompressed);
        format::write_frame_disk_header(
            writer,
            compressed.len() as i32,
            uncompressed.len() as i32,
            payload.tick,
            payload.kind,
        )?;
        writer.write_all(&compressed)?;
        Ok(())
    }

    fn build_payload(&self, world: &mut World, kind: u8, prev_tick: u64) -> Result<FramePayload> {
        let tick = world.global_version();
        let is_delta = kind == FRAME_KIND_DELTA;

        let destroyed: Vec<DestroyedEntry> = if is_delta {
            world
                .entities
                .drain_destructions()
                .into_iter()
                .map(|(index, generation)| DestroyedEntry { index, generation })
                .collect()
        } else {
            Vec::new()
        };

        let native_events = world
            .event_bus
            .native_snapshots()
            .into_iter()
            .map(|(type_id, element_size, bytes)| NativeEventBlock {
                type_id,
                element_size: element_size as i32,
                bytes,
            })
            .collect();

        let mut managed_events = Vec::new();
        for (type_id, type_name, values) in world.event_bus.managed_snapshots() {
            let mut bytes = Vec::new();
            for value in &values {
                self.codec
                    .serialize_object(type_id, Some(value.as_ref()), &mut bytes)?;
            }
            managed_events.push(ManagedEventBlock {
                type_id,
                type_name: type_name.to_string(),
                count: values.len() as i32,
                bytes,
            });
        }

        let singletons = self.capture_singletons(world)?;
        let chunks = self.capture_chunks(world, is_delta, prev_tick)?;

        Ok(FramePayload {
            tick,
            kind,
            destroyed,
            native_events,
            managed_events,
            singletons,
            chunks,
        })
    }

    fn capture_singletons(&self, world: &World) -> Result<Vec<TypedBlob>> {
        let mut out = Vec::new();
        for id in 0..world.type_registry().count() as u8 {
            let Some((value, _version)) = world.singleton_blob(id) else {
                continue;
            };
            let mut bytes = Vec::new();
            self.codec.serialize_object(id, Some(value), &mut bytes)?;
            out.push(TypedBlob {
                type_id: id as i32,
                bytes,
            });
        }
        Ok(out)
    }

    fn capture_chunks(&self, world: &mut World, is_delta: bool, prev_tick: u64) -> Result<Vec<ChunkBlob>> {
        let mut out = Vec::new();
        self.capture_header_chunks(world, is_delta, prev_tick, &mut out);

        let max_type_id = world.type_registry().count();
        for id in 0..max_type_id as u8 {
            let Some(storage) = world.table_mut_by_id(id) else {
                continue;
            };
            let managed = storage.element_size() == 0;
            let per_chunk = slots_per_chunk(storage.as_ref());
            let chunk_count = storage.chunk_count();

            for chunk_idx in 0..chunk_count {
                let dirty = !is_delta || {
                    let storage = world.table_mut_by_id(id).expect("checked above");
                    storage.has_changes_since(chunk_idx, prev_tick)
                };
                if !dirty {
                    continue;
                }

                let liveness = chunk_liveness(world, chunk_idx, per_chunk);
                let storage = world.table_mut_by_id(id).expect("checked above");
                storage.sanitize_chunk(chunk_idx, &liveness);

                let bytes = if managed {
                    self.capture_managed_chunk(storage.as_ref(), id, chunk_idx, per_chunk)?
                } else {
                    let mut bytes = Vec::new();
                    if storage.copy_chunk(chunk_idx, &mut bytes).is_err() {
                        continue;
                    }
                    bytes
                };
                out.push(ChunkBlob {
                    chunk_id: chunk_idx as i32,
                    comps: vec![TypedBlob {
                        type_id: id as i32,
                        bytes,
                    }],
                });
            }
        }
        Ok(out)
    }

    /// Encodes a managed table's chunk as `per_chunk` sequential
    /// codec-serialized slots (including the codec's own null marker for
    /// empty slots), since managed storage has no byte-exact `copy_chunk`
    /// path.
    fn capture_managed_chunk(
        &self,
        storage: &dyn ComponentStorage,
        id: ComponentId,
        chunk_idx: usize,
        per_chunk: usize,
    ) -> Result<Vec<u8>> {
        let base = (chunk_idx * per_chunk) as u32;
        let mut bytes = Vec::new();
        for offset in 0..per_chunk as u32 {
            let value = storage.get_raw_object(base + offset);
            self.codec.serialize_object(id, value, &mut bytes)?;
        }
        Ok(bytes)
    }

    fn capture_header_chunks(
        &self,
        world: &World,
        is_delta: bool,
        prev_tick: u64,
        out: &mut Vec<ChunkBlob>,
    ) {
        let chunk_count = world.entities().chunk_count();
        for chunk_idx in 0..chunk_count {
            if is_delta && !header_chunk_dirty(world, chunk_idx, prev_tick) {
                continue;
            }
            let mut bytes = Vec::new();
            world.entities().copy_chunk(chunk_idx, &mut bytes);
            out.push(ChunkBlob {
                chunk_id: chunk_idx as i32,
                comps: vec![TypedBlob {
                    type_id: ENTITY_INDEX_TYPE_ID,
                    bytes,
                }],
            });
        }
    }
}

/// Mirrors `ComponentTable`/`ManagedTable`'s own chunk-sizing formula
/// without needing the concrete `T`: `element_size() == 0` marks managed
/// storage, which chunks by slot count rather than byte budget.
fn slots_per_chunk(storage: &dyn ComponentStorage) -> usize {
    let element_size = storage.element_size();
    if element_size == 0 {
        MANAGED_CHUNK_SLOTS
    } else {
        (CHUNK_BYTES / element_size).max(1)
    }
}

fn chunk_liveness(world: &World, chunk_idx: usize, per_chunk: usize) -> Vec<bool> {
    let base = (chunk_idx * per_chunk) as u32;
    (0..per_chunk as u32)
        .map(|offset| {
            world
                .entities()
                .get_header(base + offset)
                .map(|h| h.is_active())
                .unwrap_or(false)
        })
        .collect()
}

/// A header chunk is dirty for a delta frame when any of its headers
/// changed since `prev_tick`. `World::create_entity` stamps
/// `last_change_tick` at creation time specifically so a freshly created,
/// still-componentless entity is not missed here.
fn header_chunk_dirty(world: &World, chunk_idx: usize, prev_tick: u64) -> bool {
    let base = chunk_idx * HEADER_CHUNK_CAPACITY;
    (0..HEADER_CHUNK_CAPACITY).any(|offset| {
        world
            .entities()
            .get_header((base + offset) as u32)
            .map(|h| h.last_change_tick > prev_tick)
            .unwrap_or(false)
    })
}
