use std::mem::MaybeUninit;
use std::ptr::NonNull;

use metaspace::metaspace::chunklevel::*;
use metaspace::metaspace::metachunk::Metachunk;
use metaspace::metaspace::virtual_space_node::VirtualSpace;
use metaspace::util::conversions;
use metaspace::util::Address;

/// A commit layer that accepts every request and only counts.
struct CountingSpace {
    granule_words: usize,
    committed_words: usize,
}

impl VirtualSpace for CountingSpace {
    fn commit_granule_words(&self) -> usize {
        self.granule_words
    }

    fn ensure_range_is_committed(&mut self, _p: Address, word_size: usize) -> bool {
        self.committed_words += word_size;
        true
    }

    fn uncommit_range(&mut self, _p: Address, word_size: usize) {
        self.committed_words -= word_size;
    }
}

fn with_chunk<F: FnOnce(&mut Metachunk)>(level: ChunkLevel, space: &mut CountingSpace, f: F) {
    let vs = NonNull::from(space as &mut dyn VirtualSpace);
    // The chunk is never touched, so any suitably aligned address will do.
    let base = unsafe { Address::from_usize(16 * MAX_CHUNK_BYTE_SIZE) };
    let mut header = Box::new(MaybeUninit::<Metachunk>::uninit());
    let c = NonNull::new(header.as_mut_ptr()).unwrap();
    unsafe {
        Metachunk::initialize(c, Some(vs), base, level);
        f(&mut *c.as_ptr());
    }
}

#[test]
fn full_commit_then_uncommit() {
    for level in ROOT_CHUNK_LEVEL..=CHUNK_LEVEL_64K {
        let mut space = CountingSpace {
            granule_words: conversions::bytes_to_words(64 * 1024),
            committed_words: 0,
        };
        with_chunk(level, &mut space, |chunk| {
            let w = chunk.word_size();
            assert!(chunk.ensure_committed(w));
            assert!(chunk.is_fully_committed());
            assert_eq!(chunk.committed_words(), w);
            chunk.uncommit();
            assert_eq!(chunk.committed_words(), 0);
            assert!(chunk.is_fully_uncommitted());
        });
        assert_eq!(space.committed_words, 0);
    }
}

#[test]
fn used_never_exceeds_committed() {
    let mut space = CountingSpace {
        granule_words: 512,
        committed_words: 0,
    };
    with_chunk(CHUNK_LEVEL_32K, &mut space, |chunk| {
        chunk.set_in_use();
        let mut allocated = 0;
        for request in [1, 7, 100, 511, 600, 1000, 123] {
            assert!(chunk.ensure_committed_additional(request));
            let p = chunk.allocate(request);
            assert_eq!(p, chunk.base().add_words(allocated));
            allocated += request;
            assert_eq!(chunk.used_words(), allocated);
            assert!(chunk.used_words() <= chunk.committed_words());
            assert!(chunk.committed_words() <= chunk.word_size());
            assert_eq!(chunk.committed_words() % 512, 0);
        }
        chunk.verify();
    });
}
