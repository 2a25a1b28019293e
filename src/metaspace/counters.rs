//! Counters for metaspace statistics.

/// Counts a number of memory ranges and their combined word size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemRangeCounter {
    count: usize,
    total_size: usize,
}

impl MemRangeCounter {
    pub const fn new() -> Self {
        MemRangeCounter {
            count: 0,
            total_size: 0,
        }
    }

    pub fn add(&mut self, word_size: usize) {
        self.count += 1;
        self.total_size += word_size;
    }

    pub fn sub(&mut self, word_size: usize) {
        debug_assert!(self.count > 0, "counter underflow");
        debug_assert!(
            self.total_size >= word_size,
            "size underflow: {} - {}",
            self.total_size,
            word_size
        );
        self.count -= 1;
        self.total_size -= word_size;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Asserts that the counter matches independently gathered numbers.
    pub fn check(&self, expected_count: usize, expected_total_size: usize) {
        assert_eq!(
            self.count, expected_count,
            "count mismatch: counted {}, expected {}",
            self.count, expected_count
        );
        assert_eq!(
            self.total_size, expected_total_size,
            "size mismatch: counted {}, expected {}",
            self.total_size, expected_total_size
        );
    }
}
