//! Chunked entity header storage and the free-list slot allocator.

use super::{Entity, EntityHeader, FLAG_ACTIVE};
use crate::chunk::CHUNK_BYTES;
use crate::error::{EcsError, Result};
use crate::mask::BitMask256;

/// Headers per chunk: `floor(64 KiB / 96 bytes)`, a header capacity of
/// roughly 682 per 64 KiB page.
pub const HEADER_CHUNK_CAPACITY: usize = CHUNK_BYTES / std::mem::size_of::<EntityHeader>();

struct HeaderChunk {
    headers: Vec<EntityHeader>,
    live_population: u32,
}

impl HeaderChunk {
    fn new() -> Self {
        Self {
            headers: vec![EntityHeader::inactive(); HEADER_CHUNK_CAPACITY],
            live_population: 0,
        }
    }
}

/// Owns entity headers in fixed-capacity chunks plus a LIFO free list of
/// recycled slot indices (spec §4.4).
pub struct EntityIndex {
    chunks: Vec<HeaderChunk>,
    free_list: Vec<u32>,
    max_issued: u32,
    active_count: u32,
    frame_destructions: Vec<(u32, u16)>,
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIndex {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            free_list: Vec::new(),
            max_issued: 0,
            active_count: 0,
            frame_destructions: Vec::new(),
        }
    }

    pub fn max_issued(&self) -> u32 {
        self.max_issued
    }

    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn chunk_of(index: u32) -> (usize, usize) {
        let index = index as usize;
        (index / HEADER_CHUNK_CAPACITY, index % HEADER_CHUNK_CAPACITY)
    }

    fn ensure_slot_exists(&mut self, index: u32) {
        let (chunk_idx, _) = Self::chunk_of(index);
        while self.chunks.len() <= chunk_idx {
            self.chunks.push(HeaderChunk::new());
        }
    }

    /// Allocates a new entity: reuses a free slot if one exists, otherwise
    /// grows the header array.
    pub fn create(&mut self) -> Entity {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.max_issued;
            self.max_issued += 1;
            index
        };
        self.ensure_slot_exists(index);
        let (chunk_idx, slot) = Self::chunk_of(index);
        let chunk = &mut self.chunks[chunk_idx];
        let header = &mut chunk.headers[slot];
        // Generation never becomes zero: fresh slots start at generation 1,
        // recycled slots were already bumped in `destroy`.
        if header.generation == 0 {
            header.generation = 1;
        }
        header.component_mask.clear_all();
        header.authority_mask.clear_all();
        header.set_active(true);
        header.kind_tag = 0;
        header.last_change_tick = 0;
        chunk.live_population += 1;
        self.active_count += 1;
        Entity {
            index,
            generation: header.generation,
        }
    }

    /// Validates `entity`'s generation, clears its masks, marks it
    /// inactive, recycles the slot, and logs the destruction for this
    /// frame.
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        let header = self.header_mut_checked(entity)?;
        header.component_mask.clear_all();
        header.authority_mask.clear_all();
        header.set_active(false);
        let next_generation = header.generation.wrapping_add(1).max(1);
        header.generation = next_generation;

        let (chunk_idx, _) = Self::chunk_of(entity.index);
        self.chunks[chunk_idx].live_population -= 1;
        self.active_count -= 1;
        self.free_list.push(entity.index);
        self.frame_destructions.push((entity.index, entity.generation));
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        match self.get_header(entity.index) {
            Some(h) => h.is_active() && h.generation == entity.generation,
            None => false,
        }
    }

    pub fn get_header(&self, index: u32) -> Option<&EntityHeader> {
        if index >= self.max_issued {
            return None;
        }
        let (chunk_idx, slot) = Self::chunk_of(index);
        self.chunks.get(chunk_idx).map(|c| &c.headers[slot])
    }

    pub fn get_header_unchecked(&self, index: u32) -> &EntityHeader {
        let (chunk_idx, slot) = Self::chunk_of(index);
        &self.chunks[chunk_idx].headers[slot]
    }

    pub fn get_header_mut(&mut self, index: u32) -> Option<&mut EntityHeader> {
        if index >= self.max_issued {
            return None;
        }
        let (chunk_idx, slot) = Self::chunk_of(index);
        self.chunks.get_mut(chunk_idx).map(|c| &mut c.headers[slot])
    }

    /// Validates a handle against the live header, returning the matching
    /// header on success.
    pub fn header_checked(&self, entity: Entity) -> Result<&EntityHeader> {
        let header = self
            .get_header(entity.index)
            .filter(|h| h.is_active())
            .ok_or(EcsError::StaleHandle {
                index: entity.index,
                current: 0,
                requested: entity.generation,
            })?;
        if header.generation != entity.generation {
            return Err(EcsError::StaleHandle {
                index: entity.index,
                current: header.generation,
                requested: entity.generation,
            });
        }
        Ok(header)
    }

    pub fn header_mut_checked(&mut self, entity: Entity) -> Result<&mut EntityHeader> {
        let current_generation = self
            .get_header(entity.index)
            .map(|h| h.generation)
            .unwrap_or(0);
        if current_generation != entity.generation {
            return Err(EcsError::StaleHandle {
                index: entity.index,
                current: current_generation,
                requested: entity.generation,
            });
        }
        Ok(self.get_header_mut(entity.index).expect("checked above"))
    }

    /// Hydrates a slot at a specific generation during playback, bypassing
    /// the free list entirely (playback restores exact slot layout).
    pub fn force_restore(
        &mut self,
        index: u32,
        active: bool,
        generation: u16,
        component_mask: BitMask256,
        kind_tag: u64,
    ) {
        self.ensure_slot_exists(index);
        if index >= self.max_issued {
            self.max_issued = index + 1;
        }
        let (chunk_idx, slot) = Self::chunk_of(index);
        let chunk = &mut self.chunks[chunk_idx];
        let was_active = chunk.headers[slot].is_active();
        let header = &mut chunk.headers[slot];
        header.generation = generation;
        header.component_mask = component_mask;
        header.kind_tag = kind_tag;
        header.set_active(active);
        match (was_active, active) {
            (false, true) => chunk.live_population += 1,
            (true, false) => chunk.live_population -= 1,
            _ => {}
        }
    }

    /// Copies one header chunk's raw bytes (`type_id = -1` in the frame
    /// format) into `dst`.
    pub fn copy_chunk(&self, chunk_idx: usize, dst: &mut Vec<u8>) {
        dst.clear();
        if let Some(chunk) = self.chunks.get(chunk_idx) {
            for header in &chunk.headers {
                dst.extend_from_slice(header.as_bytes());
            }
        }
    }

    /// Restores one header chunk from raw bytes captured by `copy_chunk`.
    pub fn restore_chunk(&mut self, chunk_idx: usize, src: &[u8]) {
        while self.chunks.len() <= chunk_idx {
            self.chunks.push(HeaderChunk::new());
        }
        let header_size = std::mem::size_of::<EntityHeader>();
        assert_eq!(src.len(), header_size * HEADER_CHUNK_CAPACITY);
        let chunk = &mut self.chunks[chunk_idx];
        for (slot, bytes) in src.chunks_exact(header_size).enumerate() {
            chunk.headers[slot] = EntityHeader::from_bytes(bytes);
        }
        if (chunk_idx + 1) * HEADER_CHUNK_CAPACITY > self.max_issued as usize {
            self.max_issued = ((chunk_idx + 1) * HEADER_CHUNK_CAPACITY) as u32;
        }
    }

    /// Recomputes `active_count`, `max_issued`, and per-chunk populations.
    /// Called after bulk restore during playback.
    pub fn rebuild_metadata(&mut self) {
        let mut active_count = 0u32;
        let mut highest_used = 0u32;
        self.free_list.clear();
        for (chunk_idx, chunk) in self.chunks.iter_mut().enumerate() {
            let mut population = 0u32;
            for (slot, header) in chunk.headers.iter().enumerate() {
                let index = (chunk_idx * HEADER_CHUNK_CAPACITY + slot) as u32;
                if header.is_active() {
                    population += 1;
                    active_count += 1;
                    highest_used = highest_used.max(index + 1);
                } else if header.generation > 0 {
                    self.free_list.push(index);
                }
            }
            chunk.live_population = population;
        }
        self.active_count = active_count;
        self.max_issued = self.max_issued.max(highest_used);
    }

    /// Drains and returns this frame's destruction log; used by the
    /// recorder when building a delta frame.
    pub fn drain_destructions(&mut self) -> Vec<(u32, u16)> {
        std::mem::take(&mut self.frame_destructions)
    }

    pub fn chunk_live_population(&self, chunk_idx: usize) -> u32 {
        self.chunks
            .get(chunk_idx)
            .map(|c| c.live_population)
            .unwrap_or(0)
    }

    pub fn flag_active(index_flags: u16) -> bool {
        index_flags & FLAG_ACTIVE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_destroy_recycles_and_bumps_generation() {
        let mut idx = EntityIndex::new();
        let e1 = idx.create();
        assert!(idx.is_alive(e1));
        idx.destroy(e1).unwrap();
        assert!(!idx.is_alive(e1));

        let e2 = idx.create();
        assert_eq!(e2.index, e1.index);
        assert_ne!(e2.generation, e1.generation);
        assert!(idx.is_alive(e2));
        assert!(!idx.is_alive(e1));
    }

    #[test]
    fn stale_handle_is_rejected() {
        let mut idx = EntityIndex::new();
        let e = idx.create();
        idx.destroy(e).unwrap();
        let e2 = idx.create();
        assert!(e2.index == e.index);
        let err = idx.header_checked(e).unwrap_err();
        matches!(err, EcsError::StaleHandle { .. });
    }

    #[test]
    fn chunk_roundtrip_and_rebuild() {
        let mut idx = EntityIndex::new();
        for _ in 0..(HEADER_CHUNK_CAPACITY + 5) {
            idx.create();
        }
        assert_eq!(idx.chunk_count(), 2);
        let mut bytes = Vec::new();
        idx.copy_chunk(0, &mut bytes);

        let mut idx2 = EntityIndex::new();
        idx2.restore_chunk(0, &bytes);
        idx2.rebuild_metadata();
        assert_eq!(idx2.active_count(), HEADER_CHUNK_CAPACITY as u32);
    }
}
