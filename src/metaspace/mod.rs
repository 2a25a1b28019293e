//! Metaspace chunk and free block management.
//!
//! Memory is reserved in large virtual space nodes, carved into root chunks, and root chunks
//! are split into power-of-two sized chunks by a buddy scheme (see [`chunklevel`]). Each chunk
//! is described by a [`metachunk::Metachunk`] header that lives apart from the chunk, in a
//! [`chunk_header_pool::ChunkHeaderPool`]. Memory given back by arenas is kept in a
//! [`block_tree::BlockTree`] for reuse.
//!
//! Nothing in here is thread safe. All operations must be serialized by the caller.

pub mod block_tree;
pub mod chunk_header_pool;
pub mod chunklevel;
pub mod commit_limiter;
pub mod context;
pub mod counters;
pub mod metablock;
pub mod metachunk;
pub mod metachunk_list;
pub mod virtual_space_node;
