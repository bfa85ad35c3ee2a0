//! Fixed-size, page-aligned chunk allocator.
//!
//! Unmanaged component storage wants a reserve/commit virtual-memory
//! allocator handing out 64 KiB, 32-byte-aligned regions. A portable library
//! cannot assume an `mmap`-capable target, so this implementation eagerly
//! allocates each chunk from the global allocator with the right size and
//! alignment up front — `reserve` and `commit` are kept as separate calls so
//! callers (and the rest of this crate) are written against the two-phase
//! contract, even though here `commit` is a no-op over an allocation that was
//! already backed by real memory. `free` always runs, so unmanaged storage
//! is torn down deterministically on table disposal.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Size, in bytes, of one unmanaged storage chunk.
pub const CHUNK_BYTES: usize = 64 * 1024;
/// Alignment required so a chunk's leading bytes can be treated as a
/// `BitMask256` or otherwise loaded as a vector register.
pub const CHUNK_ALIGN: usize = 32;
/// Number of reference slots in one managed-table chunk.
pub const MANAGED_CHUNK_SLOTS: usize = 16_384;

fn chunk_layout() -> Layout {
    Layout::from_size_align(CHUNK_BYTES, CHUNK_ALIGN).expect("fixed chunk layout is always valid")
}

/// An arena that hands out zeroed, 64 KiB, 32-byte aligned memory regions
/// for unmanaged component storage.
#[derive(Default)]
pub struct ChunkAllocator {
    live: usize,
}

impl ChunkAllocator {
    pub fn new() -> Self {
        Self { live: 0 }
    }

    /// Reserves and immediately backs a new chunk with zeroed memory.
    pub fn reserve(&mut self) -> RawChunk {
        let layout = chunk_layout();
        // SAFETY: layout is non-zero sized and its alignment is a power of two.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        self.live += 1;
        RawChunk { ptr, layout }
    }

    /// No-op over this allocator's eager backing; kept to mirror the
    /// spec's reserve/commit contract at call sites.
    pub fn commit(&mut self, _chunk: &RawChunk) {}

    pub fn free(&mut self, chunk: RawChunk) {
        debug_assert!(self.live > 0);
        self.live = self.live.saturating_sub(1);
        drop(chunk);
    }

    pub fn live_chunks(&self) -> usize {
        self.live
    }
}

/// An owned, zeroed, 64 KiB aligned memory region.
pub struct RawChunk {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: RawChunk owns its allocation exclusively; the pointer is never
// aliased outside of `as_slice`/`as_mut_slice`, which borrow `&self`/`&mut
// self` respectively.
unsafe impl Send for RawChunk {}
unsafe impl Sync for RawChunk {}

impl RawChunk {
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for layout.size() bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn zero(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl Drop for RawChunk {
    fn drop(&mut self) {
        // SAFETY: ptr/layout pair matches the allocation made in `reserve`.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_is_zeroed_and_aligned() {
        let mut alloc = ChunkAllocator::new();
        let chunk = alloc.reserve();
        assert_eq!(chunk.as_slice().len(), CHUNK_BYTES);
        assert!(chunk.as_slice().iter().all(|&b| b == 0));
        assert_eq!((chunk.as_slice().as_ptr() as usize) % CHUNK_ALIGN, 0);
        assert_eq!(alloc.live_chunks(), 1);
        alloc.free(chunk);
        assert_eq!(alloc.live_chunks(), 0);
    }

    #[test]
    fn write_and_readback() {
        let mut alloc = ChunkAllocator::new();
        let mut chunk = alloc.reserve();
        chunk.as_mut_slice()[0] = 0xAB;
        assert_eq!(chunk.as_slice()[0], 0xAB);
        chunk.zero();
        assert_eq!(chunk.as_slice()[0], 0);
    }
}
