//! Chunked storage for managed (boxed/reference) component types.
//!
//! Grounded in the same `ComponentTable` shape as the unmanaged table, but
//! slots hold `Option<T>` behind lazy per-chunk allocation instead of a
//! fixed-size byte buffer, since managed types have no stable byte
//! representation. Persistence for these types goes through the reflective
//! codec (`crate::codec`) rather than raw chunk bytes, addressed by
//! `type_id`.

use std::any::Any;
use std::marker::PhantomData;

use crate::chunk::MANAGED_CHUNK_SLOTS;
use crate::error::{EcsError, Result};
use crate::type_registry::ComponentId;

use super::ComponentStorage;

struct ManagedChunk<T> {
    slots: Vec<Option<T>>,
    version: u64,
}

impl<T> ManagedChunk<T> {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(MANAGED_CHUNK_SLOTS);
        slots.resize_with(MANAGED_CHUNK_SLOTS, || None);
        Self { slots, version: 0 }
    }
}

/// Component storage for managed (reference) types: `Clone` is required
/// only so `sync_from`-style world duplication can shallow-copy a slot.
pub struct ManagedTable<T: Clone + Send + Sync + 'static> {
    type_id: ComponentId,
    chunks: Vec<ManagedChunk<T>>,
    _marker: PhantomData<T>,
}

impl<T: Clone + Send + Sync + 'static> ManagedTable<T> {
    pub fn new(type_id: ComponentId) -> Self {
        Self {
            type_id,
            chunks: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn locate(slot_index: u32) -> (usize, usize) {
        let slot_index = slot_index as usize;
        (
            slot_index / MANAGED_CHUNK_SLOTS,
            slot_index % MANAGED_CHUNK_SLOTS,
        )
    }

    fn ensure_chunk(&mut self, chunk_idx: usize) {
        while self.chunks.len() <= chunk_idx {
            self.chunks.push(ManagedChunk::new());
        }
    }

    pub fn set(&mut self, slot_index: u32, value: T, tick: u64) {
        let (chunk_idx, slot) = Self::locate(slot_index);
        self.ensure_chunk(chunk_idx);
        let chunk = &mut self.chunks[chunk_idx];
        chunk.slots[slot] = Some(value);
        chunk.version = chunk.version.max(tick);
    }

    pub fn get(&self, slot_index: u32) -> Option<&T> {
        let (chunk_idx, slot) = Self::locate(slot_index);
        self.chunks.get(chunk_idx).and_then(|c| c.slots[slot].as_ref())
    }

    pub fn get_mut(&mut self, slot_index: u32, tick: u64) -> Option<&mut T> {
        let (chunk_idx, slot) = Self::locate(slot_index);
        if chunk_idx >= self.chunks.len() {
            return None;
        }
        let chunk = &mut self.chunks[chunk_idx];
        chunk.version = chunk.version.max(tick);
        chunk.slots[slot].as_mut()
    }
}

impl<T: Clone + Send + Sync + 'static> ComponentStorage for ManagedTable<T> {
    fn type_id(&self) -> ComponentId {
        self.type_id
    }

    fn element_size(&self) -> usize {
        0
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

    fn set_raw(&mut self, _slot_index: u32, _bytes: &[u8], _tick: u64) -> Result<()> {
        Err(EcsError::Unsupported)
    }

    fn get_raw(&self, _slot_index: u32) -> Option<&[u8]> {
        None
    }

    fn set_raw_object(&mut self, slot_index: u32, value: Box<dyn Any + Send + Sync>, tick: u64) -> Result<()> {
        let value = value
            .downcast::<T>()
            .map_err(|_| EcsError::Unsupported)?;
        self.set(slot_index, *value, tick);
        Ok(())
    }

    fn get_raw_object(&self, slot_index: u32) -> Option<&(dyn Any + Send + Sync)> {
        self.get(slot_index).map(|v| v as &(dyn Any + Send + Sync))
    }

    fn clear_slot(&mut self, slot_index: u32) {
        let (chunk_idx, slot) = Self::locate(slot_index);
        if let Some(chunk) = self.chunks.get_mut(chunk_idx) {
            chunk.slots[slot] = None;
        }
    }

    fn copy_chunk(&self, _chunk_idx: usize, _dst: &mut Vec<u8>) -> Result<()> {
        Err(EcsError::Unsupported)
    }

    fn restore_chunk(&mut self, _chunk_idx: usize, _src: &[u8]) -> Result<()> {
        Err(EcsError::Unsupported)
    }

    fn sanitize_chunk(&mut self, chunk_idx: usize, liveness: &[bool]) {
        if let Some(chunk) = self.chunks.get_mut(chunk_idx) {
            for (slot, alive) in chunk.slots.iter_mut().zip(liveness.iter()) {
                if !alive {
                    *slot = None;
                }
            }
        }
    }

    fn chunk_index_for_slot(&self, slot_index: u32) -> usize {
        Self::locate(slot_index).0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Name(String);

    #[test]
    fn set_get_and_clear() {
        let mut table: ManagedTable<Name> = ManagedTable::new(0);
        table.set(0, Name("alice".into()), 3);
        assert_eq!(table.get(0), Some(&Name("alice".into())));
        ComponentStorage::clear_slot(&mut table, 0);
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn raw_byte_access_is_unsupported() {
        let mut table: ManagedTable<Name> = ManagedTable::new(0);
        assert!(matches!(
            ComponentStorage::set_raw(&mut table, 0, &[], 0),
            Err(EcsError::Unsupported)
        ));
    }
}
