//! Metaspace is the chunk-based memory manager that backs class-metadata-like structures.
//!
//! The crate provides the data structures at the bottom of such a manager:
//!
//! * [`util::rbtree`]: an intrusive red-black tree whose nodes live in caller-supplied memory.
//! * [`util::fixed_item_array`]: an address-stable slab pool with an internal freelist.
//! * [`metaspace::block_tree::BlockTree`]: a best-fit free block index keyed by word size, which
//!   stores its nodes inside the free blocks themselves.
//! * [`metaspace::metachunk::Metachunk`]: the descriptor of a power-of-two sized chunk in a buddy
//!   allocation scheme, tracking used and committed words.
//! * [`metaspace::chunk_header_pool::ChunkHeaderPool`]: a pool of chunk descriptors.
//!
//! None of these structures synchronize internally. A caller is expected to serialize all
//! access with one coarse lock (the "expand lock") around the whole chunk management layer.
//! [`metaspace::context::MetaspaceContext`] ties the pieces together and is the object such a
//! lock would guard.

#[cfg(test)]
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod util;
pub mod metaspace;

pub use crate::metaspace::context::MetaspaceContext;
pub use crate::util::options::Options;
