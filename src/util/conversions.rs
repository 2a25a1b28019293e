use crate::util::constants::*;

/* Alignment */

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/* Conversion */

pub const fn words_to_bytes(words: usize) -> usize {
    words << LOG_BYTES_IN_WORD
}

/// Convert bytes to words. `bytes` must be word aligned.
pub const fn bytes_to_words(bytes: usize) -> usize {
    debug_assert!(raw_is_aligned(bytes, BYTES_IN_WORD));
    bytes >> LOG_BYTES_IN_WORD
}

pub const fn bytes_to_words_up(bytes: usize) -> usize {
    (bytes + BYTES_IN_WORD - 1) >> LOG_BYTES_IN_WORD
}

#[cfg(test)]
mod tests {
    use crate::util::constants::BYTES_IN_WORD;
    use crate::util::conversions::*;

    #[test]
    fn test_raw_align() {
        assert_eq!(raw_align_up(0x1001, 0x1000), 0x2000);
        assert_eq!(raw_align_up(0x1000, 0x1000), 0x1000);
        assert_eq!(raw_align_down(0x1fff, 0x1000), 0x1000);
        assert!(raw_is_aligned(0x4000, 0x1000));
        assert!(!raw_is_aligned(0x4008, 0x1000));
    }

    #[test]
    fn test_word_conversion() {
        assert_eq!(words_to_bytes(3), 3 * BYTES_IN_WORD);
        assert_eq!(bytes_to_words(4 * BYTES_IN_WORD), 4);
        assert_eq!(bytes_to_words_up(4 * BYTES_IN_WORD + 1), 5);
        assert_eq!(bytes_to_words_up(0), 0);
    }
}
