//! A pool of chunk headers.
//!
//! Chunks are split and merged all the time, and each split needs a new header. The pool keeps
//! headers in slabs and recycles returned headers, so that header churn never goes through
//! the general purpose allocator.

use std::mem;
use std::ptr::NonNull;

use crate::metaspace::metachunk::{ChunkPtr, Metachunk};
use crate::util::conversions;
use crate::util::fixed_item_array::FixedItemArray;
use crate::util::Address;

/// Number of headers per slab.
pub const SLAB_CAPACITY: usize = 128;

/// Fresh headers are filled with this in debug builds, to catch reads before initialization.
const UNINITIALIZED_PATTERN: u8 = 0xAB;
/// Returned headers are filled with this in debug builds, to catch use after return.
const ZAP_PATTERN: u8 = 0xCC;

/// See the module documentation. The pool is not thread safe.
#[derive(Default)]
pub struct ChunkHeaderPool {
    headers: FixedItemArray<Metachunk, SLAB_CAPACITY, 0>,
}

impl ChunkHeaderPool {
    pub fn new() -> Self {
        ChunkHeaderPool {
            headers: FixedItemArray::new(),
        }
    }

    /// Get a header. The header is uninitialized and must be set up with
    /// [`Metachunk::initialize`] before use. Returns `None` if no memory is left for a new
    /// slab.
    pub fn allocate_chunk_header(&mut self) -> Option<ChunkPtr> {
        let slabs_before = self.headers.num_slabs();
        let c = self.headers.allocate()?;
        if self.headers.num_slabs() != slabs_before {
            debug!(
                "Chunk header pool grew to {} slabs ({} headers)",
                self.headers.num_slabs(),
                self.headers.capacity()
            );
        }
        if cfg!(debug_assertions) {
            unsafe {
                Self::header_address(c)
                    .fill_bytes(UNINITIALIZED_PATTERN, mem::size_of::<Metachunk>())
            };
        }
        Some(c)
    }

    /// Give a header back. The chunk must be free. The header is dead afterwards.
    ///
    /// # Safety
    /// `c` must come from this pool, and must not be used afterwards.
    pub unsafe fn return_chunk_header(&mut self, c: ChunkPtr) {
        debug_assert!(
            c.as_ref().is_free(),
            "returning a chunk header that is {}",
            c.as_ref().state()
        );
        if cfg!(debug_assertions) {
            Self::header_address(c).fill_bytes(ZAP_PATTERN, mem::size_of::<Metachunk>());
        }
        Metachunk::mark_dead(c);
        self.headers.deallocate(c);
    }

    fn header_address(c: NonNull<Metachunk>) -> Address {
        Address::from_mut_ptr(c.as_ptr())
    }

    /// Number of headers handed out and not returned.
    pub fn used(&self) -> usize {
        self.headers.num_allocated()
    }

    /// Number of headers that can be handed out without growing the pool.
    pub fn freelist_size(&self) -> usize {
        self.headers.num_free()
    }

    pub fn num_slabs(&self) -> usize {
        self.headers.num_slabs()
    }

    pub fn memory_footprint_words(&self) -> usize {
        conversions::bytes_to_words_up(self.headers.memory_footprint_bytes())
    }

    pub fn verify(&self) {
        self.headers.verify();
        assert_eq!(self.used() + self.freelist_size(), self.headers.capacity());
    }
}
