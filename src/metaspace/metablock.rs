use crate::util::Address;
use std::fmt;

/// A contiguous range of metaspace words. An empty block has a zero base and zero size.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MetaBlock {
    base: Address,
    word_size: usize,
}

impl MetaBlock {
    pub const fn new(base: Address, word_size: usize) -> Self {
        MetaBlock { base, word_size }
    }

    pub const fn empty() -> Self {
        MetaBlock {
            base: Address::ZERO,
            word_size: 0,
        }
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

    pub fn is_empty(&self) -> bool {
        self.word_size == 0
    }

    /// Whether the base is aligned to `alignment_words` words.
    pub fn is_aligned_base(&self, alignment_words: usize) -> bool {
        self.base
            .is_aligned_to(crate::util::conversions::words_to_bytes(alignment_words))
    }

    /// Shrinks this block to `head_words` words and returns the remainder.
    pub fn split_off_tail(&mut self, head_words: usize) -> MetaBlock {
        debug_assert!(
            head_words <= self.word_size,
            "cannot split {} words off a {} word block",
            head_words,
            self.word_size
        );
        let tail = MetaBlock::new(self.base.add_words(head_words), self.word_size - head_words);
        self.word_size = head_words;
        tail
    }
}

impl Default for MetaBlock {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for MetaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {} words}}", self.base, self.word_size)
    }
}
