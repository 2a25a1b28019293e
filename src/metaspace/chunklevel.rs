//! Chunk levels of the buddy scheme.
//!
//! A root chunk has level 0. Each level halves the chunk size, down to the smallest chunk at
//! [`HIGHEST_CHUNK_LEVEL`].

use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_MBYTE};
use crate::util::conversions;

pub type ChunkLevel = u8;

/// Size of a root chunk.
pub const MAX_CHUNK_BYTE_SIZE: usize = 4 * BYTES_IN_MBYTE;
pub const MAX_CHUNK_WORD_SIZE: usize = conversions::bytes_to_words(MAX_CHUNK_BYTE_SIZE);

/// Size of the smallest chunk.
pub const MIN_CHUNK_BYTE_SIZE: usize = BYTES_IN_KBYTE;
pub const MIN_CHUNK_WORD_SIZE: usize = conversions::bytes_to_words(MIN_CHUNK_BYTE_SIZE);

pub const ROOT_CHUNK_LEVEL: ChunkLevel = 0;
pub const LOWEST_CHUNK_LEVEL: ChunkLevel = ROOT_CHUNK_LEVEL;
pub const HIGHEST_CHUNK_LEVEL: ChunkLevel =
    (MAX_CHUNK_BYTE_SIZE / MIN_CHUNK_BYTE_SIZE).trailing_zeros() as ChunkLevel;
pub const NUM_CHUNK_LEVELS: usize = HIGHEST_CHUNK_LEVEL as usize + 1;

pub const CHUNK_LEVEL_4M: ChunkLevel = 0;
pub const CHUNK_LEVEL_2M: ChunkLevel = 1;
pub const CHUNK_LEVEL_1M: ChunkLevel = 2;
pub const CHUNK_LEVEL_512K: ChunkLevel = 3;
pub const CHUNK_LEVEL_256K: ChunkLevel = 4;
pub const CHUNK_LEVEL_128K: ChunkLevel = 5;
pub const CHUNK_LEVEL_64K: ChunkLevel = 6;
pub const CHUNK_LEVEL_32K: ChunkLevel = 7;
pub const CHUNK_LEVEL_16K: ChunkLevel = 8;
pub const CHUNK_LEVEL_8K: ChunkLevel = 9;
pub const CHUNK_LEVEL_4K: ChunkLevel = 10;
pub const CHUNK_LEVEL_2K: ChunkLevel = 11;
pub const CHUNK_LEVEL_1K: ChunkLevel = 12;

static_assertions::const_assert_eq!(HIGHEST_CHUNK_LEVEL, CHUNK_LEVEL_1K);
static_assertions::const_assert!(MAX_CHUNK_BYTE_SIZE.is_power_of_two());

pub const fn is_valid_level(level: ChunkLevel) -> bool {
    level <= HIGHEST_CHUNK_LEVEL
}

pub fn check_valid_level(level: ChunkLevel) {
    assert!(is_valid_level(level), "invalid chunk level {}", level);
}

/// Word size of a chunk of the given level.
pub const fn word_size_for_level(level: ChunkLevel) -> usize {
    debug_assert!(is_valid_level(level));
    MAX_CHUNK_WORD_SIZE >> level
}

/// The level of the smallest chunk that can hold `word_size` words.
pub fn level_fitting_word_size(word_size: usize) -> ChunkLevel {
    debug_assert!(
        word_size <= MAX_CHUNK_WORD_SIZE,
        "{} words exceed the root chunk size",
        word_size
    );
    let fitting = word_size.max(MIN_CHUNK_WORD_SIZE).next_power_of_two();
    (MAX_CHUNK_WORD_SIZE / fitting).trailing_zeros() as ChunkLevel
}
