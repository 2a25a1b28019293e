//! Reservation and commit of the memory that chunks are carved from.

use std::io::Result;
use std::ops::Range;
use std::sync::Arc;

use crate::metaspace::chunklevel::{MAX_CHUNK_BYTE_SIZE, MAX_CHUNK_WORD_SIZE};
use crate::metaspace::commit_limiter::CommitLimiter;
use crate::util::conversions;
use crate::util::memory;
use crate::util::Address;

/// The commit layer underneath chunks. A chunk asks the virtual space it lives in to commit or
/// uncommit parts of its memory.
pub trait VirtualSpace {
    /// Memory is committed in granules of this many words.
    fn commit_granule_words(&self) -> usize;

    /// Make sure the words `[p, p + word_size)` are committed. The range is extended outwards
    /// to granule boundaries. Returns false if the memory could not be committed, e.g.
    /// because a commit limit was hit.
    fn ensure_range_is_committed(&mut self, p: Address, word_size: usize) -> bool;

    /// Uncommit the words `[p, p + word_size)`. The range must be granule aligned.
    fn uncommit_range(&mut self, p: Address, word_size: usize);
}

/// A contiguous reserved address range, aligned to the root chunk size, from which root chunks
/// are carved front to back. Commit state is tracked per granule.
pub struct VirtualSpaceNode {
    base: Address,
    word_size: usize,
    /// The raw mapping, including the part lost to alignment.
    mapping: (Address, usize),
    /// Words handed out as root chunks.
    used_words: usize,
    granule_words: usize,
    commit_mask: Vec<bool>,
    committed_words: usize,
    limiter: Arc<CommitLimiter>,
}

impl VirtualSpaceNode {
    /// Reserve a node of `word_size` words.
    pub fn create(
        word_size: usize,
        granule_words: usize,
        limiter: Arc<CommitLimiter>,
    ) -> Result<Self> {
        debug_assert!(conversions::raw_is_aligned(word_size, MAX_CHUNK_WORD_SIZE));
        debug_assert!(granule_words.is_power_of_two() && granule_words <= MAX_CHUNK_WORD_SIZE);
        let bytes = conversions::words_to_bytes(word_size);
        let (base, mapping) = memory::reserve_aligned(bytes, MAX_CHUNK_BYTE_SIZE)?;
        debug!(
            "Reserved virtual space node {} - {} ({} words)",
            base,
            base + bytes,
            word_size
        );
        Ok(VirtualSpaceNode {
            base,
            word_size,
            mapping,
            used_words: 0,
            granule_words,
            commit_mask: vec![false; word_size / granule_words],
            committed_words: 0,
            limiter,
        })
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn end(&self) -> Address {
        self.base.add_words(self.word_size)
    }

    pub fn word_size(&self) -> usize {
        self.word_size
    }

    pub fn used_words(&self) -> usize {
        self.used_words
    }

    pub fn free_words(&self) -> usize {
        self.word_size - self.used_words
    }

    pub fn committed_words(&self) -> usize {
        self.committed_words
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr.is_in_range(self.base, self.end())
    }

    /// Carve the next root chunk area. Returns `None` if the node is used up.
    pub fn allocate_root_area(&mut self) -> Option<Address> {
        if self.free_words() < MAX_CHUNK_WORD_SIZE {
            return None;
        }
        let area = self.base.add_words(self.used_words);
        self.used_words += MAX_CHUNK_WORD_SIZE;
        trace!("Carved root chunk area {} from node {}", area, self.base);
        Some(area)
    }

    /// Are all granules touched by the range committed?
    pub fn is_range_committed(&self, p: Address, word_size: usize) -> bool {
        self.granules_of(p, word_size).all(|g| self.commit_mask[g])
    }

    fn granules_of(&self, p: Address, word_size: usize) -> Range<usize> {
        debug_assert!(
            p >= self.base && p.add_words(word_size) <= self.end(),
            "range {} + {} words is outside node {}",
            p,
            word_size,
            self.base
        );
        let first = p.words_since(self.base) / self.granule_words;
        let last = conversions::raw_align_up(
            p.add_words(word_size).words_since(self.base),
            self.granule_words,
        ) / self.granule_words;
        first..last
    }

    fn granule_address(&self, granule: usize) -> Address {
        self.base.add_words(granule * self.granule_words)
    }

    // The maximal runs of granules in `granules` whose commit state is `committed`.
    fn runs(&self, granules: Range<usize>, committed: bool) -> Vec<Range<usize>> {
        let mut runs = vec![];
        let mut g = granules.start;
        while g < granules.end {
            if self.commit_mask[g] != committed {
                g += 1;
                continue;
            }
            let start = g;
            while g < granules.end && self.commit_mask[g] == committed {
                g += 1;
            }
            runs.push(start..g);
        }
        runs
    }
}

impl VirtualSpace for VirtualSpaceNode {
    fn commit_granule_words(&self) -> usize {
        self.granule_words
    }

    fn ensure_range_is_committed(&mut self, p: Address, word_size: usize) -> bool {
        let granules = self.granules_of(p, word_size);
        let missing = granules
            .clone()
            .filter(|g| !self.commit_mask[*g])
            .count();
        if missing == 0 {
            return true;
        }
        let mut reserved_words = missing * self.granule_words;
        if !self.limiter.try_reserve(reserved_words) {
            debug!(
                "Cannot commit {} words at {}: commit limit reached",
                reserved_words, p
            );
            return false;
        }

        for run in self.runs(granules, false) {
            let start = self.granule_address(run.start);
            let words = run.len() * self.granule_words;
            let bytes = conversions::words_to_bytes(words);
            if let Err(e) = memory::commit(start, bytes) {
                warn!("Failed to commit {} bytes at {}: {}", bytes, start, e);
                self.limiter.decrease_committed(reserved_words);
                return false;
            }
            trace!("Committed {} - {}", start, start + bytes);
            for g in run.clone() {
                self.commit_mask[g] = true;
            }
            self.committed_words += words;
            reserved_words -= words;
        }
        debug_assert_eq!(reserved_words, 0);
        true
    }

    fn uncommit_range(&mut self, p: Address, word_size: usize) {
        debug_assert!(
            conversions::raw_is_aligned(p.words_since(self.base), self.granule_words)
                && conversions::raw_is_aligned(word_size, self.granule_words),
            "uncommit range {} + {} words is not granule aligned",
            p,
            word_size
        );
        let granules = self.granules_of(p, word_size);
        for run in self.runs(granules, true) {
            let start = self.granule_address(run.start);
            let bytes = conversions::words_to_bytes(run.len() * self.granule_words);
            if let Err(e) = memory::uncommit(start, bytes) {
                // The memory stays committed, and is still accounted for.
                warn!("Failed to uncommit {} bytes at {}: {}", bytes, start, e);
                continue;
            }
            trace!("Uncommitted {} - {}", start, start + bytes);
            for g in run.clone() {
                self.commit_mask[g] = false;
            }
            let words = run.len() * self.granule_words;
            self.committed_words -= words;
            self.limiter.decrease_committed(words);
        }
    }
}

impl Drop for VirtualSpaceNode {
    fn drop(&mut self) {
        self.limiter.decrease_committed(self.committed_words);
        let (start, size) = self.mapping;
        if let Err(e) = memory::release(start, size) {
            warn!("Failed to release virtual space node {}: {}", self.base, e);
        } else {
            debug!("Released virtual space node {}", self.base);
        }
    }
}
