//! Dense, chunked storage for unmanaged (POD) component types.
//!
//! Grounded in `storage/table.rs`'s `ComponentTable`, but the indirection is
//! removed: that table mapped `entity_id -> byte offset` through a
//! `HashMap` into one growable buffer. Slots here are addressed directly by
//! entity slot index across fixed 64 KiB chunks (spec §4.2), so there is no
//! offset map and no compaction step — a chunk's byte layout is simply
//! `[T; slots_per_chunk]`.

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::chunk::{ChunkAllocator, RawChunk, CHUNK_BYTES};
use crate::error::{EcsError, Result};
use crate::type_registry::ComponentId;

use super::ComponentStorage;

fn slots_per_chunk<T>() -> usize {
    (CHUNK_BYTES / std::mem::size_of::<T>()).max(1)
}

struct DataChunk<T> {
    raw: RawChunk,
    version: u64,
    /// Per-slot presence, independent of the chunk's byte-level allocation:
    /// a slot can sit inside an allocated chunk without its entity ever
    /// having had this component (spec §4.5).
    present: Vec<bool>,
    _marker: PhantomData<T>,
}

impl<T: Pod> DataChunk<T> {
    fn byte_len() -> usize {
        slots_per_chunk::<T>() * std::mem::size_of::<T>()
    }

    fn slots(&self) -> &[T] {
        bytemuck::cast_slice(&self.raw.as_slice()[..Self::byte_len()])
    }

    fn slots_mut(&mut self) -> &mut [T] {
        let len = Self::byte_len();
        bytemuck::cast_slice_mut(&mut self.raw.as_mut_slice()[..len])
    }
}

/// Component storage for `Copy + Pod` types, chunked for cache locality and
/// direct-indexed so access never needs a lookup structure. Each chunk's
/// bytes come from a `ChunkAllocator`, not a plain `Vec<T>`, so the 32-byte
/// alignment the mask and SIMD code paths rely on holds for component data
/// as well as entity headers.
pub struct ComponentTable<T: Pod> {
    type_id: ComponentId,
    allocator: ChunkAllocator,
    chunks: Vec<DataChunk<T>>,
    _marker: PhantomData<T>,
}

impl<T: Pod> ComponentTable<T> {
    pub fn new(type_id: ComponentId) -> Self {
        Self {
            type_id,
            allocator: ChunkAllocator::new(),
            chunks: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn locate(slot_index: u32) -> (usize, usize) {
        let per_chunk = slots_per_chunk::<T>();
        let slot_index = slot_index as usize;
        (slot_index / per_chunk, slot_index % per_chunk)
    }

    fn ensure_chunk(&mut self, chunk_idx: usize) {
        while self.chunks.len() <= chunk_idx {
            let raw = self.allocator.reserve();
            self.allocator.commit(&raw);
            let present = vec![false; slots_per_chunk::<T>()];
            self.chunks.push(DataChunk { raw, version: 0, present, _marker: PhantomData });
        }
    }

    pub fn set(&mut self, slot_index: u32, value: T, tick: u64) {
        let (chunk_idx, slot) = Self::locate(slot_index);
        self.ensure_chunk(chunk_idx);
        let chunk = &mut self.chunks[chunk_idx];
        chunk.slots_mut()[slot] = value;
        chunk.present[slot] = true;
        chunk.version = chunk.version.max(tick);
    }

    pub fn get(&self, slot_index: u32) -> Option<&T> {
        let (chunk_idx, slot) = Self::locate(slot_index);
        let chunk = self.chunks.get(chunk_idx)?;
        if !chunk.present[slot] {
            return None;
        }
        Some(&chunk.slots()[slot])
    }

    /// Mutable access that also bumps the owning chunk's version, marking
    /// it dirty for the next delta frame. Returns `None` if the slot's
    /// component is not present.
    pub fn get_mut(&mut self, slot_index: u32, tick: u64) -> Option<&mut T> {
        let (chunk_idx, slot) = Self::locate(slot_index);
        self.ensure_chunk(chunk_idx);
        let chunk = &mut self.chunks[chunk_idx];
        if !chunk.present[slot] {
            return None;
        }
        chunk.version = chunk.version.max(tick);
        Some(&mut chunk.slots_mut()[slot])
    }
}

impl<T: Pod + Send + Sync + 'static> ComponentStorage for ComponentTable<T> {
    fn type_id(&self) -> ComponentId {
        self.type_id
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn ensure_capacity(&mut self, slot_index: u32) {
        let (chunk_idx, _) = Self::locate(slot_index);
        self.ensure_chunk(chunk_idx);
    }

    fn chunk_version(&self, chunk_idx: usize) -> u64 {
        self.chunks.get(chunk_idx).map(|c| c.version).unwrap_or(0)
    }

    fn set_raw(&mut self, slot_index: u32, bytes: &[u8], tick: u64) -> Result<()> {
        if bytes.len() != std::mem::size_of::<T>() {
            return Err(EcsError::CorruptFrame(format!(
                "expected {} bytes, got {}",
                std::mem::size_of::<T>(),
                bytes.len()
            )));
        }
        let value: T = *bytemuck::from_bytes(bytes);
        self.set(slot_index, value, tick);
        Ok(())
    }

    fn get_raw(&self, slot_index: u32) -> Option<&[u8]> {
        self.get(slot_index).map(bytemuck::bytes_of)
    }

    fn set_raw_object(
        &mut self,
        _slot_index: u32,
        _value: Box<dyn std::any::Any + Send + Sync>,
        _tick: u64,
    ) -> Result<()> {
        Err(EcsError::Unsupported)
    }

    fn get_raw_object(&self, _slot_index: u32) -> Option<&(dyn std::any::Any + Send + Sync)> {
        None
    }

    fn clear_slot(&mut self, slot_index: u32) {
        let (chunk_idx, slot) = Self::locate(slot_index);
        if let Some(chunk) = self.chunks.get_mut(chunk_idx) {
            chunk.slots_mut()[slot] = T::zeroed();
            chunk.present[slot] = false;
        }
    }

    fn copy_chunk(&self, chunk_idx: usize, dst: &mut Vec<u8>) -> Result<()> {
        dst.clear();
        if let Some(chunk) = self.chunks.get(chunk_idx) {
            dst.extend_from_slice(bytemuck::cast_slice(chunk.slots()));
        }
        Ok(())
    }

    /// Restores a chunk's raw bytes without knowing which slots are
    /// actually present on their owning entities, so every slot is marked
    /// present conservatively; `mark_presence` (called by playback once the
    /// matching entity headers are restored) narrows that down to the
    /// entities' own `component_mask` bits.
    fn restore_chunk(&mut self, chunk_idx: usize, src: &[u8]) -> Result<()> {
        self.ensure_chunk(chunk_idx);
        let per_chunk = slots_per_chunk::<T>();
        if src.len() != per_chunk * std::mem::size_of::<T>() {
            return Err(EcsError::CorruptFrame(format!(
                "chunk byte length {} does not match {} slots of size {}",
                src.len(),
                per_chunk,
                std::mem::size_of::<T>()
            )));
        }
        let slots: &[T] = bytemuck::cast_slice(src);
        let chunk = &mut self.chunks[chunk_idx];
        chunk.slots_mut().copy_from_slice(slots);
        chunk.present.iter_mut().for_each(|p| *p = true);
        Ok(())
    }

    fn sanitize_chunk(&mut self, chunk_idx: usize, liveness: &[bool]) {
        if let Some(chunk) = self.chunks.get_mut(chunk_idx) {
            for (slot, alive) in chunk.slots_mut().iter_mut().zip(liveness.iter()) {
                if !alive {
                    *slot = T::zeroed();
                }
            }
        }
    }

    fn mark_presence(&mut self, chunk_idx: usize, presence: &[bool]) {
        if let Some(chunk) = self.chunks.get_mut(chunk_idx) {
            for (slot, &is_present) in chunk.present.iter_mut().zip(presence.iter()) {
                *slot = is_present;
            }
        }
    }

    fn chunk_index_for_slot(&self, slot_index: u32) -> usize {
        Self::locate(slot_index).0
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn set_get_roundtrip_across_chunk_boundary() {
        let mut table: ComponentTable<Position> = ComponentTable::new(0);
        let per_chunk = slots_per_chunk::<Position>() as u32;
        table.set(0, Position { x: 1.0, y: 2.0 }, 5);
        table.set(per_chunk, Position { x: 3.0, y: 4.0 }, 6);
        assert_eq!(table.get(0), Some(&Position { x: 1.0, y: 2.0 }));
        assert_eq!(table.get(per_chunk), Some(&Position { x: 3.0, y: 4.0 }));
        assert_eq!(table.chunk_count(), 2);
        assert_eq!(ComponentStorage::chunk_version(&table, 0), 5);
        assert_eq!(ComponentStorage::chunk_version(&table, 1), 6);
    }

    #[test]
    fn get_raw_is_none_for_an_unset_slot_sharing_an_allocated_chunk() {
        let mut table: ComponentTable<Position> = ComponentTable::new(0);
        table.set(0, Position { x: 1.0, y: 1.0 }, 1);
        table.ensure_capacity(1);
        assert!(ComponentStorage::get_raw(&table, 0).is_some());
        assert!(ComponentStorage::get_raw(&table, 1).is_none());
    }

    #[test]
    fn mark_presence_narrows_a_restored_chunk() {
        let mut table: ComponentTable<Position> = ComponentTable::new(0);
        let mut bytes = vec![0u8; DataChunk::<Position>::byte_len()];
        bytes[0..4].copy_from_slice(&1.0f32.to_ne_bytes());
        ComponentStorage::restore_chunk(&mut table, 0, &bytes).unwrap();
        assert!(table.get(1).is_some());

        let per_chunk = slots_per_chunk::<Position>();
        let mut presence = vec![false; per_chunk];
        presence[0] = true;
        ComponentStorage::mark_presence(&mut table, 0, &presence);
        assert!(table.get(0).is_some());
        assert!(table.get(1).is_none());
    }

    #[test]
    fn chunk_copy_restore_roundtrip() {
        let mut table: ComponentTable<Position> = ComponentTable::new(0);
        table.set(0, Position { x: 9.0, y: 9.0 }, 1);
        let mut bytes = Vec::new();
        ComponentStorage::copy_chunk(&table, 0, &mut bytes).unwrap();

        let mut restored: ComponentTable<Position> = ComponentTable::new(0);
        ComponentStorage::restore_chunk(&mut restored, 0, &bytes).unwrap();
        assert_eq!(restored.get(0), Some(&Position { x: 9.0, y: 9.0 }));
    }

    #[test]
    fn sanitize_zeroes_dead_slots() {
        let mut table: ComponentTable<Position> = ComponentTable::new(0);
        table.set(0, Position { x: 1.0, y: 1.0 }, 1);
        table.set(1, Position { x: 2.0, y: 2.0 }, 1);
        let per_chunk = slots_per_chunk::<Position>();
        let mut liveness = vec![true; per_chunk];
        liveness[1] = false;
        ComponentStorage::sanitize_chunk(&mut table, 0, &liveness);
        assert_eq!(table.get(0), Some(&Position { x: 1.0, y: 1.0 }));
        assert_eq!(table.get(1), Some(&Position { x: 0.0, y: 0.0 }));
    }
}
