//! The chunk descriptor.
//!
//! A [`Metachunk`] describes one chunk of the buddy scheme: a power-of-two sized, size aligned
//! range of a virtual space node. The header lives apart from the chunk memory, in the
//! [`ChunkHeaderPool`](crate::metaspace::chunk_header_pool::ChunkHeaderPool).
//!
//! ```text
//!  base                         top                  committed             end
//!   |---------- used -----------|-------- free -------|                     |
//!   |------------------ committed --------------------|---- uncommitted ----|
//!   |--------------------------- word_size(level) -------------------------|
//! ```
//!
//! Chunks are linked two ways. `prev`/`next` link a chunk into at most one chunk list (a free
//! list or an arena's in-use list). `prev_in_vs`/`next_in_vs` link the chunk to its physical
//! neighbours in the same root chunk area, which is how buddies are found for merging.

use std::fmt;
use std::ptr::{self, NonNull};

use crate::metaspace::chunklevel::{self, ChunkLevel, ROOT_CHUNK_LEVEL};
use crate::metaspace::virtual_space_node::VirtualSpace;
use crate::util::conversions;
use crate::util::{Address, MetaWord};

pub type ChunkPtr = NonNull<Metachunk>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChunkState {
    /// In a free list, or in transit between lists.
    Free,
    /// Owned by an arena.
    InUse,
    /// The header is unused and sits in the header pool.
    Dead,
}

/// See the module documentation.
///
/// The layout is fixed: a returned header keeps its pool freelist link in the first word, and
/// `state` must lie outside of it so that a dead header still reads as dead.
#[repr(C)]
pub struct Metachunk {
    committed_words: usize,
    used_words: usize,
    base: Address,
    prev: Option<ChunkPtr>,
    next: Option<ChunkPtr>,
    prev_in_vs: Option<ChunkPtr>,
    next_in_vs: Option<ChunkPtr>,
    vsnode: Option<NonNull<dyn VirtualSpace>>,
    level: ChunkLevel,
    state: ChunkState,
}

impl Metachunk {
    fn new(vsnode: Option<NonNull<dyn VirtualSpace>>, base: Address, level: ChunkLevel) -> Self {
        Metachunk {
            committed_words: 0,
            used_words: 0,
            base,
            prev: None,
            next: None,
            prev_in_vs: None,
            next_in_vs: None,
            vsnode,
            level,
            state: ChunkState::Free,
        }
    }

    /// Write a fresh, free and uncommitted descriptor into the header at `this`. Header memory
    /// from the pool is uninitialized, and this is the only valid way to bring it to life.
    ///
    /// # Safety
    /// `this` must point to writable memory for a `Metachunk` that nobody else references.
    /// `vsnode` must outlive the chunk.
    pub unsafe fn initialize(
        this: ChunkPtr,
        vsnode: Option<NonNull<dyn VirtualSpace>>,
        base: Address,
        level: ChunkLevel,
    ) {
        chunklevel::check_valid_level(level);
        debug_assert!(
            base.is_aligned_to(conversions::words_to_bytes(chunklevel::word_size_for_level(level))),
            "chunk base {} is not aligned to the size of level {}",
            base,
            level
        );
        ptr::write(this.as_ptr(), Metachunk::new(vsnode, base, level));
    }

    /// Reset to a free, unlinked root chunk without memory.
    pub fn clear(&mut self) {
        *self = Metachunk::new(None, Address::ZERO, ROOT_CHUNK_LEVEL);
    }

    // State

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn set_free(&mut self) {
        self.state = ChunkState::Free;
    }

    pub fn set_in_use(&mut self) {
        self.state = ChunkState::InUse;
    }

    /// Set the state of a header whose other fields may be garbage. No reference to such a
    /// header may be formed.
    ///
    /// # Safety
    /// `this` must point to writable header memory.
    pub(crate) unsafe fn mark_dead(this: ChunkPtr) {
        ptr::addr_of_mut!((*this.as_ptr()).state).write(ChunkState::Dead);
    }

    pub fn is_free(&self) -> bool {
        self.state == ChunkState::Free
    }

    pub fn is_in_use(&self) -> bool {
        self.state == ChunkState::InUse
    }

    pub fn is_dead(&self) -> bool {
        self.state == ChunkState::Dead
    }

    // Geometry

    pub fn level(&self) -> ChunkLevel {
        self.level
    }

    pub fn inc_level(&mut self) {
        debug_assert!(self.level < chunklevel::HIGHEST_CHUNK_LEVEL);
        self.level += 1;
    }

    pub fn dec_level(&mut self) {
        debug_assert!(self.level > ROOT_CHUNK_LEVEL);
        self.level -= 1;
    }

    pub fn word_size(&self) -> usize {
        chunklevel::word_size_for_level(self.level)
    }

    pub fn base(&self) -> Address {
        self.base
    }

    /// The first free word.
    pub fn top(&self) -> Address {
        self.base.add_words(self.used_words)
    }

    pub fn end(&self) -> Address {
        self.base.add_words(self.word_size())
    }

    pub fn is_root_chunk(&self) -> bool {
        self.level == ROOT_CHUNK_LEVEL
    }

    /// Is this chunk the lower half of its parent? Only meaningful for non-root chunks.
    pub fn is_leader(&self) -> bool {
        debug_assert!(!self.is_root_chunk(), "root chunks have no buddy");
        let parent_words = chunklevel::word_size_for_level(self.level - 1);
        let parent_bytes = conversions::words_to_bytes(parent_words);
        self.base.is_aligned_to(parent_bytes)
    }

    // Usage

    pub fn used_words(&self) -> usize {
        self.used_words
    }

    pub fn free_words(&self) -> usize {
        self.word_size() - self.used_words
    }

    pub fn committed_words(&self) -> usize {
        self.committed_words
    }

    pub fn free_below_committed_words(&self) -> usize {
        self.committed_words - self.used_words
    }

    pub fn is_fully_committed(&self) -> bool {
        self.committed_words == self.word_size()
    }

    pub fn is_fully_uncommitted(&self) -> bool {
        self.committed_words == 0
    }

    pub fn reset_used_words(&mut self) {
        self.used_words = 0;
    }

    /// Bump allocate `word_size` words from the top. The caller must have made sure the words
    /// are committed, see [`Self::ensure_committed_additional`].
    pub fn allocate(&mut self, word_size: usize) -> Address {
        debug_assert!(
            word_size <= self.free_below_committed_words(),
            "cannot allocate {} words: only {} committed words left in chunk {}",
            word_size,
            self.free_below_committed_words(),
            self.base
        );
        let p = self.top();
        self.used_words += word_size;
        p
    }

    // Commit

    /// Set the committed size without touching memory. The value is rounded up to the commit
    /// granule and capped at the chunk size, since a partly committed granule is fully
    /// committed.
    pub fn set_committed_words(&mut self, v: usize) {
        let granule_words = self.vsnode_ref().commit_granule_words();
        self.committed_words = conversions::raw_align_up(v, granule_words).min(self.word_size());
    }

    /// Commit the chunk up to at least `new_committed_words` words. The committed size grows in
    /// whole granules, or to the end of the chunk if that is closer. Returns false if the
    /// virtual space could not commit the memory.
    pub fn commit_up_to(&mut self, new_committed_words: usize) -> bool {
        let granule_words = self.vsnode_ref().commit_granule_words();
        let commit_to =
            conversions::raw_align_up(new_committed_words, granule_words).min(self.word_size());
        if commit_to <= self.committed_words {
            return true;
        }
        let commit_from = self.committed_words;
        let p = self.base.add_words(commit_from);
        // Safety: the vsnode outlives the chunk, and callers serialize access.
        let vsnode = unsafe { self.vsnode_mut() };
        if !vsnode.ensure_range_is_committed(p, commit_to - commit_from) {
            return false;
        }
        self.committed_words = commit_to;
        true
    }

    /// Make sure at least `new_committed_words` words are committed.
    pub fn ensure_committed(&mut self, new_committed_words: usize) -> bool {
        debug_assert!(new_committed_words <= self.word_size());
        if new_committed_words <= self.committed_words {
            return true;
        }
        self.commit_up_to(new_committed_words)
    }

    /// Make sure `additional_words` words above the top are committed.
    pub fn ensure_committed_additional(&mut self, additional_words: usize) -> bool {
        self.ensure_committed(self.used_words + additional_words)
    }

    pub fn ensure_fully_committed(&mut self) -> bool {
        self.ensure_committed(self.word_size())
    }

    /// Uncommit the whole chunk. Only free, empty chunks of at least one commit granule can be
    /// uncommitted.
    pub fn uncommit(&mut self) {
        debug_assert!(self.is_free(), "uncommitting a chunk that is {}", self.state);
        debug_assert_eq!(self.used_words, 0);
        let word_size = self.word_size();
        // Safety: the vsnode outlives the chunk, and callers serialize access.
        let vsnode = unsafe { self.vsnode_mut() };
        debug_assert!(
            word_size >= vsnode.commit_granule_words(),
            "chunk of {} words is smaller than a commit granule",
            word_size
        );
        vsnode.uncommit_range(self.base, word_size);
        self.committed_words = 0;
    }

    // Links

    pub fn vsnode(&self) -> Option<NonNull<dyn VirtualSpace>> {
        self.vsnode
    }

    fn vsnode_ref(&self) -> &dyn VirtualSpace {
        let vsnode = self.vsnode.expect("chunk has no virtual space");
        unsafe { vsnode.as_ref() }
    }

    // Safety: no other reference to the vsnode may be alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn vsnode_mut(&self) -> &mut dyn VirtualSpace {
        let mut vsnode = self.vsnode.expect("chunk has no virtual space");
        vsnode.as_mut()
    }

    pub fn prev(&self) -> Option<ChunkPtr> {
        self.prev
    }

    pub fn next(&self) -> Option<ChunkPtr> {
        self.next
    }

    pub fn set_prev(&mut self, c: Option<ChunkPtr>) {
        self.prev = c;
    }

    pub fn set_next(&mut self, c: Option<ChunkPtr>) {
        self.next = c;
    }

    pub fn prev_in_vs(&self) -> Option<ChunkPtr> {
        self.prev_in_vs
    }

    pub fn next_in_vs(&self) -> Option<ChunkPtr> {
        self.next_in_vs
    }

    pub fn set_prev_in_vs(&mut self, c: Option<ChunkPtr>) {
        self.prev_in_vs = c;
    }

    pub fn set_next_in_vs(&mut self, c: Option<ChunkPtr>) {
        self.next_in_vs = c;
    }

    // Debugging

    /// Fill the first `word_size` words of the chunk with `pattern`.
    ///
    /// # Safety
    /// The words must be committed and must not be in use by anyone.
    pub unsafe fn fill_with_pattern(&self, pattern: MetaWord, word_size: usize) {
        debug_assert!(word_size <= self.committed_words);
        let p = self.base.to_mut_ptr::<MetaWord>();
        for i in 0..word_size {
            p.add(i).write(pattern);
        }
    }

    /// Assert that the first `word_size` words of the chunk hold `pattern`.
    ///
    /// # Safety
    /// The words must be committed.
    pub unsafe fn check_pattern(&self, pattern: MetaWord, word_size: usize) {
        debug_assert!(word_size <= self.committed_words);
        let p = self.base.to_ptr::<MetaWord>();
        for i in 0..word_size {
            let v = p.add(i).read();
            assert_eq!(
                v,
                pattern,
                "word {} of chunk {} is {:#x}, expected {:#x}",
                i,
                self.base,
                v,
                pattern
            );
        }
    }

    /// Check the size invariants and the physical neighbour links. Panics on violation.
    pub fn verify(&self) {
        assert!(!self.is_dead(), "verifying a dead chunk");
        chunklevel::check_valid_level(self.level);
        let word_size = self.word_size();
        assert!(
            self.used_words <= self.committed_words && self.committed_words <= word_size,
            "chunk {}: used {} / committed {} / size {} out of order",
            self.base,
            self.used_words,
            self.committed_words,
            word_size
        );
        assert!(
            self.base.is_aligned_to(conversions::words_to_bytes(word_size)),
            "chunk {} is not aligned to its size",
            self.base
        );
        if let Some(prev) = self.prev_in_vs {
            let prev = unsafe { prev.as_ref() };
            assert_eq!(prev.end(), self.base, "chunk {} has a gap to its predecessor", self.base);
            assert_eq!(
                prev.next_in_vs.map(|p| p.as_ptr() as *const Metachunk),
                Some(self as *const _)
            );
        }
        if let Some(next) = self.next_in_vs {
            let next = unsafe { next.as_ref() };
            assert_eq!(next.base, self.end(), "chunk {} has a gap to its successor", self.base);
            assert_eq!(
                next.prev_in_vs.map(|p| p.as_ptr() as *const Metachunk),
                Some(self as *const _)
            );
        }
    }

    pub fn print_on(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(
            out,
            "chunk {}, level {} ({} words), {}, used {}, committed {}",
            self.base,
            self.level,
            self.word_size(),
            self.state,
            self.used_words,
            self.committed_words
        )
    }
}

impl fmt::Debug for Metachunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print_on(f)
    }
}
