//! A free list for blocks of arbitrary size, indexed by word size.
//!
//! Free blocks carry their own bookkeeping: a node is written into the first words of each
//! block. Blocks of a distinct size form the nodes of a red-black tree keyed by size. Further
//! blocks of a size that is already in the tree are chained to the tree node through `next`,
//! so the tree only holds one node per size.
//!
//! ```text
//!                 +-----+
//!                 | 100 |  -> 100 -> 100
//!                 +-----+
//!                /       \
//!         +-----+         +-----+
//!         |  64 |         | 160 |  -> 160
//!         +-----+         +-----+
//! ```
//!
//! [`BlockTree::remove_block`] is a best fit by size: it returns a block of the smallest size
//! that satisfies the request. Blocks of the same size are handed out last in, first out.

use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use memoffset::offset_of;

use crate::metaspace::counters::MemRangeCounter;
use crate::metaspace::metablock::MetaBlock;
use crate::util::conversions;
use crate::util::rbtree::{IntrusiveRBTree, NodePtr, RBNode, RBTreeComparator};
use crate::util::Address;

#[cfg(debug_assertions)]
const NODE_CANARY: usize = 0x4e4f_4445;

/// Written over the node of a block when it leaves the tree.
const ZAP_PATTERN: u8 = 0xF3;

#[repr(C)]
struct Node {
    #[cfg(debug_assertions)]
    canary: usize,
    tree_node: RBNode,
    /// The next block of the same size. Only set on tree nodes and chain members.
    next: Option<NonNull<Node>>,
    word_size: usize,
}

impl Node {
    /// Write a fresh node into the first words of `block`.
    ///
    /// # Safety
    /// The block must be writable memory that nobody else uses.
    unsafe fn init_in(block: MetaBlock) -> NonNull<Node> {
        let node = block.base().to_mut_ptr::<Node>();
        ptr::write(
            node,
            Node {
                #[cfg(debug_assertions)]
                canary: NODE_CANARY,
                tree_node: RBNode::new(),
                next: None,
                word_size: block.word_size(),
            },
        );
        NonNull::new_unchecked(node)
    }

    /// Get the node that embeds `tree_node`.
    ///
    /// # Safety
    /// `tree_node` must be the `tree_node` field of a `Node`.
    unsafe fn from_tree_node(tree_node: NodePtr) -> NonNull<Node> {
        let node = (tree_node.as_ptr() as *mut u8).sub(offset_of!(Node, tree_node)) as *mut Node;
        NonNull::new_unchecked(node)
    }

    fn tree_node_of(node: NonNull<Node>) -> NodePtr {
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*node.as_ptr()).tree_node)) }
    }

    fn address_of(node: NonNull<Node>) -> Address {
        Address::from_mut_ptr(node.as_ptr())
    }

    #[cfg(debug_assertions)]
    fn has_valid_canary(&self) -> bool {
        self.canary == NODE_CANARY
    }
}

/// Orders block tree nodes by block size.
struct BlockSizeComparator;

impl RBTreeComparator for BlockSizeComparator {
    type Key = usize;

    unsafe fn key_of(node: NodePtr) -> usize {
        (*Node::from_tree_node(node).as_ptr()).word_size
    }
}

/// See the module documentation.
///
/// The tree does not synchronize. It needs external synchronisation, and it must not outlive
/// the memory of the blocks it holds.
pub struct BlockTree {
    tree: IntrusiveRBTree<BlockSizeComparator>,
    counter: MemRangeCounter,
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTree {
    /// The smallest block that can hold its own node.
    pub const MIN_WORD_SIZE: usize = conversions::bytes_to_words_up(mem::size_of::<Node>());

    pub const fn new() -> Self {
        BlockTree {
            tree: IntrusiveRBTree::new(),
            counter: MemRangeCounter::new(),
        }
    }

    /// Add a free block.
    ///
    /// # Safety
    /// The block must be word aligned, writable memory of at least [`Self::MIN_WORD_SIZE`]
    /// words. The memory belongs to the tree until it is handed out by
    /// [`Self::remove_block`]. The block must not overlap any block in the tree.
    pub unsafe fn add_block(&mut self, block: MetaBlock) {
        let word_size = block.word_size();
        debug_assert!(
            word_size >= Self::MIN_WORD_SIZE,
            "block {:?} is too small to hold a node",
            block
        );
        debug_assert!(block.is_aligned_base(1), "block {:?} is not word aligned", block);
        let new_node = Node::init_in(block);
        let cursor = self.tree.cursor(word_size);
        match cursor.node() {
            Some(tree_node) => {
                // Chain the new block behind the tree node of its size.
                let head = Node::from_tree_node(tree_node);
                self.check_node(head);
                (*new_node.as_ptr()).next = (*head.as_ptr()).next;
                (*head.as_ptr()).next = Some(new_node);
            }
            None => {
                self.tree
                    .insert_at_cursor(Node::tree_node_of(new_node), &cursor);
            }
        }
        self.counter.add(word_size);
        #[cfg(feature = "extreme_assertions")]
        self.verify();
    }

    /// Remove a block of at least `word_size` words. The block returned is one of the smallest
    /// blocks that are large enough, and may be larger than asked for. Returns `None` if no
    /// block is large enough.
    pub fn remove_block(&mut self, word_size: usize) -> Option<MetaBlock> {
        debug_assert!(word_size >= Self::MIN_WORD_SIZE);
        let tree_node = self.tree.closest_geq(word_size)?;
        let removed = unsafe {
            let head = Node::from_tree_node(tree_node);
            self.check_node(head);
            match (*head.as_ptr()).next {
                Some(next) => {
                    // Take a chain member and leave the tree alone.
                    self.check_node(next);
                    (*head.as_ptr()).next = (*next.as_ptr()).next;
                    next
                }
                None => {
                    self.tree.remove(tree_node);
                    head
                }
            }
        };
        let block = MetaBlock::new(Node::address_of(removed), unsafe {
            (*removed.as_ptr()).word_size
        });
        debug_assert!(block.word_size() >= word_size);
        self.counter.sub(block.word_size());

        if cfg!(debug_assertions) {
            unsafe { block.base().fill_bytes(ZAP_PATTERN, mem::size_of::<Node>()) };
        }
        #[cfg(feature = "extreme_assertions")]
        self.verify();
        Some(block)
    }

    /// Number of blocks in the tree.
    pub fn count(&self) -> usize {
        self.counter.count()
    }

    /// Combined word size of all blocks in the tree.
    pub fn total_size(&self) -> usize {
        self.counter.total_size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    // Opportunistic corruption check. A broken canary triggers a full check of the tree, which
    // gives a better picture of the damage, then fails for sure.
    #[cfg(debug_assertions)]
    unsafe fn check_node(&self, node: NonNull<Node>) {
        if !(*node.as_ptr()).has_valid_canary() {
            self.verify();
            panic!(
                "block tree node at {} is corrupt (canary {:#x})",
                Node::address_of(node),
                (*node.as_ptr()).canary
            );
        }
    }

    #[cfg(not(debug_assertions))]
    unsafe fn check_node(&self, _node: NonNull<Node>) {}

    /// Check the tree structure, the size order, the same-size chains and the counters. Panics
    /// on violation.
    pub fn verify(&self) {
        let mut count = 0;
        let mut total_size = 0;
        self.tree.verify_self_with(|tree_node| {
            let head = unsafe { Node::from_tree_node(tree_node) };
            let size = unsafe { (*head.as_ptr()).word_size };
            assert!(
                size >= Self::MIN_WORD_SIZE,
                "node at {} has invalid size {}",
                Node::address_of(head),
                size
            );
            let mut current = Some(head);
            while let Some(node) = current {
                let n = unsafe { &*node.as_ptr() };
                #[cfg(debug_assertions)]
                assert!(
                    n.has_valid_canary(),
                    "node at {} has a broken canary",
                    Node::address_of(node)
                );
                assert_eq!(
                    n.word_size,
                    size,
                    "chain member at {} differs in size from its head",
                    Node::address_of(node)
                );
                if node != head {
                    assert!(
                        n.tree_node.parent().is_none()
                            && n.tree_node.left().is_none()
                            && n.tree_node.right().is_none(),
                        "chain member at {} is linked into the tree",
                        Node::address_of(node)
                    );
                }
                count += 1;
                total_size += size;
                current = n.next;
            }
        });
        self.counter.check(count, total_size);
    }

    /// Print the tree, one size per line, followed by the addresses of the blocks of that size.
    pub fn print_tree(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        if self.tree.is_empty() {
            return writeln!(out, "<empty>");
        }
        self.tree.print_on_with(out, |out, tree_node| {
            let mut current = Some(unsafe { Node::from_tree_node(tree_node) });
            let mut first = true;
            while let Some(node) = current {
                write!(
                    out,
                    "{}{}",
                    if first { ": " } else { " -> " },
                    Node::address_of(node)
                )?;
                first = false;
                current = unsafe { (*node.as_ptr()).next };
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_WORD;
    use crate::util::test_util::AlignedBuffer;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    /// Hands out consecutive, non-overlapping blocks from one buffer.
    struct BlockSource {
        buffer: AlignedBuffer,
        top: Address,
    }

    impl BlockSource {
        fn new(words: usize) -> Self {
            let buffer = AlignedBuffer::new(words * BYTES_IN_WORD, BYTES_IN_WORD);
            let top = buffer.start();
            BlockSource { buffer, top }
        }

        fn take(&mut self, word_size: usize) -> MetaBlock {
            let block = MetaBlock::new(self.top, word_size);
            self.top = block.end();
            assert!(self.top <= self.buffer.end());
            block
        }
    }

    #[test]
    fn min_word_size_fits_node() {
        assert!(BlockTree::MIN_WORD_SIZE * BYTES_IN_WORD >= mem::size_of::<Node>());
        assert!((BlockTree::MIN_WORD_SIZE - 1) * BYTES_IN_WORD < mem::size_of::<Node>());
    }

    #[test]
    fn empty_tree() {
        let mut tree = BlockTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.count(), 0);
        assert_eq!(tree.total_size(), 0);
        assert!(tree.remove_block(BlockTree::MIN_WORD_SIZE).is_none());
        tree.verify();
    }

    #[test]
    fn best_fit() {
        let mut source = BlockSource::new(1024);
        let mut tree = BlockTree::new();
        let small = source.take(20);
        let medium = source.take(40);
        let large = source.take(80);
        unsafe {
            tree.add_block(large);
            tree.add_block(small);
            tree.add_block(medium);
        }
        tree.verify();
        assert_eq!(tree.count(), 3);
        assert_eq!(tree.total_size(), 140);

        assert_eq!(tree.remove_block(21), Some(medium));
        assert_eq!(tree.remove_block(10), Some(small));
        assert_eq!(tree.remove_block(81), None);
        assert_eq!(tree.remove_block(80), Some(large));
        assert!(tree.is_empty());
        tree.verify();
    }

    #[test]
    fn same_size_blocks_are_lifo() {
        let mut source = BlockSource::new(1024);
        let mut tree = BlockTree::new();
        let blocks: Vec<_> = (0..5).map(|_| source.take(16)).collect();
        for b in &blocks {
            unsafe { tree.add_block(*b) };
        }
        tree.verify();
        assert_eq!(tree.count(), 5);
        for b in blocks.iter().skip(1).rev() {
            assert_eq!(tree.remove_block(16), Some(*b));
            tree.verify();
        }
        assert_eq!(tree.remove_block(16), Some(blocks[0]));
        assert!(tree.is_empty());
    }

    #[test]
    fn print() {
        let mut source = BlockSource::new(1024);
        let mut tree = BlockTree::new();
        let mut out = String::new();
        tree.print_tree(&mut out).unwrap();
        assert_eq!(out, "<empty>\n");

        let a = source.take(30);
        let b = source.take(30);
        let c = source.take(50);
        unsafe {
            tree.add_block(a);
            tree.add_block(b);
            tree.add_block(c);
        }
        let mut out = String::new();
        tree.print_tree(&mut out).unwrap();
        assert_eq!(
            out,
            format!("30 (B): {} -> {}\n  50 (R): {}\n", a.base(), b.base(), c.base())
        );
    }

    #[test]
    fn random_add_remove_matches_model() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x6d65_7461);
        let mut source = BlockSource::new(1 << 20);
        let mut tree = BlockTree::new();
        // size -> blocks of that size, most recently added last
        let mut model: BTreeMap<usize, Vec<MetaBlock>> = BTreeMap::new();
        let mut spare: Vec<MetaBlock> = Vec::new();

        for round in 0..4000 {
            if rng.random_bool(0.55) {
                let block = match spare.pop() {
                    Some(b) if rng.random_bool(0.5) => b,
                    other => {
                        spare.extend(other);
                        source.take(rng.random_range(BlockTree::MIN_WORD_SIZE..200))
                    }
                };
                unsafe { tree.add_block(block) };
                model.entry(block.word_size()).or_default().push(block);
            } else {
                let request = rng.random_range(BlockTree::MIN_WORD_SIZE..220);
                let expected_size = model.range(request..).next().map(|(s, _)| *s);
                let removed = tree.remove_block(request);
                match expected_size {
                    None => assert_eq!(removed, None),
                    Some(size) => {
                        let removed = removed.unwrap();
                        assert_eq!(removed.word_size(), size);
                        let chain = model.get_mut(&size).unwrap();
                        let pos = chain.iter().position(|b| *b == removed).unwrap();
                        chain.remove(pos);
                        if chain.is_empty() {
                            model.remove(&size);
                        }
                        spare.push(removed);
                    }
                }
            }
            if round % 97 == 0 {
                tree.verify();
            }
            let count: usize = model.values().map(|v| v.len()).sum();
            assert_eq!(tree.count(), count);
        }
        tree.verify();

        // Drain, smallest first.
        let mut requests: Vec<usize> = model
            .iter()
            .flat_map(|(s, v)| std::iter::repeat(*s).take(v.len()))
            .collect();
        requests.sort_unstable();
        for request in requests {
            let removed = tree.remove_block(request).unwrap();
            assert_eq!(removed.word_size(), request);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.total_size(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn corrupt_canary_is_detected() {
        let mut source = BlockSource::new(1024);
        let mut tree = BlockTree::new();
        let block = source.take(32);
        unsafe {
            tree.add_block(block);
            block.base().store::<usize>(0);
        }
        tree.remove_block(32);
    }
}
