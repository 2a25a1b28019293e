//! The owner of all chunk management state.
//!
//! A [`MetaspaceContext`] reserves virtual space nodes, carves root chunks out of them, splits
//! chunks into smaller buddies, and merges returned chunks with their free buddies again.
//! Chunk headers come from the context's own [`ChunkHeaderPool`].
//!
//! Free chunks are kept in one list per level. Every free chunk that the caller does not hold
//! is in one of these lists, which is what lets [`MetaspaceContext::merge_with_buddy`] take a
//! free buddy away from wherever it is.
//!
//! The context does no locking of its own. Callers serialize all operations on a context,
//! including the operations on the chunks it handed out, with one lock around the context.

use std::io::Result;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::metaspace::chunk_header_pool::ChunkHeaderPool;
use crate::metaspace::chunklevel::{self, ChunkLevel, NUM_CHUNK_LEVELS, ROOT_CHUNK_LEVEL};
use crate::metaspace::commit_limiter::CommitLimiter;
use crate::metaspace::metachunk::{ChunkPtr, Metachunk};
use crate::metaspace::metachunk_list::MetachunkList;
use crate::metaspace::virtual_space_node::{VirtualSpace, VirtualSpaceNode};
use crate::util::conversions;
use crate::util::Address;
use crate::util::options::Options;

pub struct MetaspaceContext {
    options: Options,
    commit_limiter: Arc<CommitLimiter>,
    chunk_header_pool: ChunkHeaderPool,
    free_chunks: [MetachunkList; NUM_CHUNK_LEVELS],
    // Boxed, so that chunks can point at their node.
    nodes: Vec<Box<VirtualSpaceNode>>,
}

// The context is not thread-safe. It needs external synchronisation (e.g. using Mutex).
// On the other hand, to put the context into a Mutex<T>, it must implement Send.
// Chunk headers and nodes are owned by the context, so the context can be sent between
// threads together with all its raw pointers.
unsafe impl Send for MetaspaceContext {}

impl MetaspaceContext {
    pub fn new(options: Options) -> Self {
        let limiter = Arc::new(CommitLimiter::new(options.max_committed_words()));
        Self::with_commit_limiter(options, limiter)
    }

    /// Create a context whose commits count against `commit_limiter`, which may be shared with
    /// other contexts.
    pub fn with_commit_limiter(options: Options, commit_limiter: Arc<CommitLimiter>) -> Self {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("Metaspace initialized the logger."),
            Err(_) => debug!(
                "Metaspace failed to initialize the logger. Possibly a logger has been initialized by user."
            ),
        }
        debug!("Creating metaspace context with {:?}", options);
        MetaspaceContext {
            options,
            commit_limiter,
            chunk_header_pool: ChunkHeaderPool::new(),
            free_chunks: Default::default(),
            nodes: vec![],
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn commit_limiter(&self) -> &Arc<CommitLimiter> {
        &self.commit_limiter
    }

    pub fn chunk_header_pool(&self) -> &ChunkHeaderPool {
        &self.chunk_header_pool
    }

    /// The free chunks of `level`.
    pub fn free_chunks(&self, level: ChunkLevel) -> &MetachunkList {
        &self.free_chunks[level as usize]
    }

    pub fn num_free_chunks(&self) -> usize {
        self.free_chunks.iter().map(|l| l.count()).sum()
    }

    pub fn free_chunks_word_size(&self) -> usize {
        self.free_chunks.iter().map(|l| l.word_size()).sum()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn reserved_words(&self) -> usize {
        self.nodes.iter().map(|n| n.word_size()).sum()
    }

    pub fn committed_words(&self) -> usize {
        self.nodes.iter().map(|n| n.committed_words()).sum()
    }

    /// Reserve a new virtual space node.
    pub fn expand(&mut self) -> Result<()> {
        let word_size = conversions::bytes_to_words(self.options.virtual_space_node_reserve_bytes);
        let node = VirtualSpaceNode::create(
            word_size,
            self.options.commit_granule_words(),
            self.commit_limiter.clone(),
        )?;
        self.nodes.push(Box::new(node));
        debug!(
            "Metaspace context expanded to {} nodes ({} words reserved)",
            self.nodes.len(),
            self.reserved_words()
        );
        Ok(())
    }

    /// Carve a new root chunk, reserving a new node if needed. The chunk is free and in no
    /// list. Returns `None` if no memory could be reserved.
    pub fn allocate_root_chunk(&mut self) -> Option<ChunkPtr> {
        // The header comes first. A carved root area cannot be given back to its node.
        let Some(mut c) = self.chunk_header_pool.allocate_chunk_header() else {
            warn!("Out of memory for chunk headers");
            return None;
        };
        let Some((vsnode, base)) = self.carve_root_area() else {
            unsafe {
                Metachunk::initialize(c, None, Address::ZERO, ROOT_CHUNK_LEVEL);
                self.chunk_header_pool.return_chunk_header(c);
            }
            return None;
        };
        let chunk = unsafe {
            Metachunk::initialize(c, Some(vsnode), base, ROOT_CHUNK_LEVEL);
            c.as_mut()
        };
        if self.options.new_chunks_are_fully_committed && !chunk.ensure_fully_committed() {
            // The chunk is still usable, it will be committed on demand.
            debug!("Could not commit new root chunk {} in full", base);
        }
        trace!("Allocated root chunk {:?}", chunk);
        Some(c)
    }

    // Carve a root area from the current node, reserving a new node if it is used up.
    fn carve_root_area(&mut self) -> Option<(NonNull<dyn VirtualSpace>, Address)> {
        let used_up = self
            .nodes
            .last()
            .map_or(true, |n| n.free_words() < chunklevel::MAX_CHUNK_WORD_SIZE);
        if used_up {
            if let Err(e) = self.expand() {
                warn!("Failed to reserve a virtual space node: {}", e);
                return None;
            }
        }
        let node = self.nodes.last_mut()?;
        let base = node.allocate_root_area()?;
        Some((NonNull::from(&mut **node as &mut dyn VirtualSpace), base))
    }

    /// Get an in-use chunk of `level`. Free chunks are reused, smallest first, and larger
    /// chunks are split down to the level. Returns `None` if no memory is left.
    pub fn allocate_chunk(&mut self, level: ChunkLevel) -> Option<ChunkPtr> {
        chunklevel::check_valid_level(level);
        let mut c = match self.take_free_chunk(level) {
            Some(c) => c,
            None => self.allocate_root_chunk()?,
        };
        unsafe {
            while c.as_ref().level() < level {
                if self.split_chunk(c).is_none() {
                    self.return_chunk(c);
                    return None;
                }
            }
            c.as_mut().set_in_use();
        }
        Some(c)
    }

    // Remove the smallest free chunk that is at least as large as a chunk of `level`.
    fn take_free_chunk(&mut self, level: ChunkLevel) -> Option<ChunkPtr> {
        (ROOT_CHUNK_LEVEL..=level)
            .rev()
            .find_map(|l| self.free_chunks[l as usize].remove_first())
    }

    /// Split `c` into two buddies of the next level. `c` shrinks to the lower half in place,
    /// the upper half gets a new header and is added to the free lists. The committed words are
    /// divided between the halves. Returns the upper half, or `None` if no header could be
    /// allocated, in which case `c` is unchanged.
    ///
    /// # Safety
    /// `c` must be a free chunk of this context that is in no list, and the caller must hold
    /// it.
    pub unsafe fn split_chunk(&mut self, mut c: ChunkPtr) -> Option<ChunkPtr> {
        let chunk = c.as_mut();
        debug_assert!(chunk.is_free(), "splitting a chunk that is {}", chunk.state());
        debug_assert!(chunk.prev().is_none() && chunk.next().is_none());
        debug_assert!(chunk.level() < chunklevel::HIGHEST_CHUNK_LEVEL);

        let mut follower = self.chunk_header_pool.allocate_chunk_header()?;
        let old_committed = chunk.committed_words();
        chunk.inc_level();
        let half = chunk.word_size();
        Metachunk::initialize(
            follower,
            chunk.vsnode(),
            chunk.base().add_words(half),
            chunk.level(),
        );
        let f = follower.as_mut();
        f.set_committed_words(old_committed.saturating_sub(half));
        chunk.set_committed_words(old_committed.min(half));

        f.set_next_in_vs(chunk.next_in_vs());
        if let Some(mut next) = chunk.next_in_vs() {
            next.as_mut().set_prev_in_vs(Some(follower));
        }
        f.set_prev_in_vs(Some(c));
        chunk.set_next_in_vs(Some(follower));

        trace!("Split chunk {} into two of level {}", chunk.base(), chunk.level());
        self.free_chunks[f.level() as usize].add(follower);
        Some(follower)
    }

    /// Merge `c` with its buddy if the buddy is free and not split. The buddy is taken out of
    /// its free list. The lower half of the pair absorbs the upper half, whose header goes back
    /// to the pool. Returns the merged chunk, or `None` if `c` could not be merged.
    ///
    /// # Safety
    /// `c` must be a free chunk of this context that is in no list, and the caller must hold
    /// it.
    pub unsafe fn merge_with_buddy(&mut self, c: ChunkPtr) -> Option<ChunkPtr> {
        let chunk = c.as_ref();
        debug_assert!(chunk.is_free(), "merging a chunk that is {}", chunk.state());
        debug_assert!(chunk.prev().is_none() && chunk.next().is_none());
        if chunk.is_root_chunk() {
            return None;
        }
        let (mut leader, mut follower, buddy) = if chunk.is_leader() {
            let buddy = chunk.next_in_vs()?;
            (c, buddy, buddy)
        } else {
            let buddy = chunk.prev_in_vs()?;
            (buddy, c, buddy)
        };
        let b = buddy.as_ref();
        if b.level() != chunk.level() || !b.is_free() {
            return None;
        }
        self.free_chunks[b.level() as usize].remove(buddy);

        let l = leader.as_mut();
        let f = follower.as_mut();
        let old_word_size = l.word_size();
        let committed = if l.is_fully_committed() {
            old_word_size + f.committed_words()
        } else {
            l.committed_words()
        };
        l.set_next_in_vs(f.next_in_vs());
        if let Some(mut next) = f.next_in_vs() {
            next.as_mut().set_prev_in_vs(Some(leader));
        }
        l.dec_level();
        l.set_committed_words(committed);

        self.chunk_header_pool.return_chunk_header(follower);
        trace!("Merged chunk {} to level {}", l.base(), l.level());
        Some(leader)
    }

    /// Take back a chunk. The chunk becomes free, is merged with free buddies as far as
    /// possible, may be uncommitted, and ends up in the free lists. Its memory is not cleared.
    ///
    /// # Safety
    /// `c` must be a chunk of this context that is in no list, and must not be used
    /// afterwards.
    pub unsafe fn return_chunk(&mut self, mut c: ChunkPtr) {
        let chunk = c.as_mut();
        debug_assert!(!chunk.is_dead(), "returning a dead chunk");
        chunk.set_free();
        chunk.reset_used_words();

        while let Some(merged) = self.merge_with_buddy(c) {
            c = merged;
        }

        let chunk = c.as_mut();
        if self.options.uncommit_free_chunks
            && chunk.word_size() >= self.options.commit_granule_words()
            && !chunk.is_fully_uncommitted()
        {
            trace!("Uncommitting free chunk {}", chunk.base());
            chunk.uncommit();
        }
        self.free_chunks[chunk.level() as usize].add(c);
    }

    /// Check the header pool and the free lists. Panics on violation.
    pub fn verify(&self) {
        self.chunk_header_pool.verify();
        for (level, list) in self.free_chunks.iter().enumerate() {
            list.verify();
            for c in list.iter() {
                let chunk = unsafe { c.as_ref() };
                assert!(chunk.is_free(), "chunk {:?} in a free list", chunk);
                assert_eq!(chunk.level() as usize, level, "chunk {:?} in the wrong list", chunk);
            }
        }
    }
}
