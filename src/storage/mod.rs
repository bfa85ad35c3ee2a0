//! Type-erased component storage dispatch.
//!
//! Grounded in `db.rs`'s `TableHandle` trait, which let `Database` hold a
//! dense collection of differently-typed tables behind one object-safe
//! interface. Here the same idea backs a `Vec<Option<Box<dyn
//! ComponentStorage>>>` indexed directly by the dense `ComponentId` the type
//! registry assigns, in place of a `DashMap<u16, _>` (IDs here are dense
//! `u8`s, not sparse `u16`s, so plain vector indexing is cheaper and
//! simpler than a concurrent map).

pub mod managed;
pub mod table;

use std::any::Any;

use crate::error::Result;
use crate::type_registry::ComponentId;

pub use managed::ManagedTable;
pub use table::ComponentTable;

/// Object-safe contract every component table implements, letting `World`
/// drive storage generically by `ComponentId` without knowing `T`.
pub trait ComponentStorage: Send + Sync {
    fn type_id(&self) -> ComponentId;

    /// Size in bytes of one element, or 0 for managed (reference) storage.
    fn element_size(&self) -> usize;

    fn chunk_count(&self) -> usize;

    fn ensure_capacity(&mut self, slot_index: u32);

    fn chunk_version(&self, chunk_idx: usize) -> u64;

    fn has_changes_since(&self, chunk_idx: usize, since_tick: u64) -> bool {
        self.chunk_version(chunk_idx) > since_tick
    }

    /// Raw byte write, valid only for unmanaged (POD) storage. `tick` stamps
    /// the owning chunk's version, the same way `ComponentTable::set` does
    /// for a typed write, so a write that only ever goes through this path
    /// (e.g. `CommandBuffer::playback`) still shows up in a later delta
    /// capture.
    fn set_raw(&mut self, slot_index: u32, bytes: &[u8], tick: u64) -> Result<()>;

    /// Raw byte read, valid only for unmanaged (POD) storage. Returns `None`
    /// for a slot whose component is not present, even inside an allocated
    /// chunk.
    fn get_raw(&self, slot_index: u32) -> Option<&[u8]>;

    /// Type-erased object write, valid only for managed storage. See
    /// `set_raw` for the `tick` parameter.
    fn set_raw_object(&mut self, slot_index: u32, value: Box<dyn Any + Send + Sync>, tick: u64) -> Result<()>;

    /// Type-erased object read, valid only for managed storage.
    fn get_raw_object(&self, slot_index: u32) -> Option<&(dyn Any + Send + Sync)>;

    fn clear_slot(&mut self, slot_index: u32);

    /// Overwrites per-slot presence for one chunk, used by playback to
    /// reconcile a just-restored chunk's presence with the entity headers
    /// restored alongside it (spec §4.5: presence is authoritative from
    /// `component_mask`, not from chunk allocation). A no-op default for
    /// storage that already tracks presence precisely per slot (managed
    /// tables use `Option<T>`).
    fn mark_presence(&mut self, _chunk_idx: usize, _presence: &[bool]) {}

    /// Chunk index that would hold `slot_index`, exposed so a caller (e.g.
    /// a delta query) can check only the one chunk relevant to a candidate
    /// entity instead of every chunk in the table.
    fn chunk_index_for_slot(&self, slot_index: u32) -> usize;

    /// Copies one chunk's raw bytes for persistence. Managed tables return
    /// `Unsupported` via the recorder's reflective codec path instead.
    fn copy_chunk(&self, chunk_idx: usize, dst: &mut Vec<u8>) -> Result<()>;

    fn restore_chunk(&mut self, chunk_idx: usize, src: &[u8]) -> Result<()>;

    /// Zeroes slots whose `liveness[slot] == false` before the chunk is
    /// persisted, so dead entity data never leaks into a recording.
    fn sanitize_chunk(&mut self, chunk_idx: usize, liveness: &[bool]);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
