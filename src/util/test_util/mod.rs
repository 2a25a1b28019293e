use crate::metaspace::virtual_space_node::VirtualSpace;
use crate::util::conversions;
use crate::util::Address;
use std::alloc::Layout;
use std::collections::BTreeSet;
use std::panic;
use std::sync::Mutex;

lazy_static! {
    // A global lock to make tests serial.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

// force some tests to be executed serially
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // If one test fails, the lock will become poisoned. We would want to continue for other tests anyway.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

// Always execute a cleanup closure no matter the test panics or not.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

/// A heap buffer with a chosen alignment, used as fake chunk or block memory.
pub struct AlignedBuffer {
    start: Address,
    layout: Layout,
}

impl AlignedBuffer {
    pub fn new(bytes: usize, align: usize) -> Self {
        let layout = Layout::from_size_align(bytes, align).unwrap();
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        AlignedBuffer {
            start: Address::from_mut_ptr(ptr),
            layout,
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.layout.size()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.start.to_mut_ptr(), self.layout) }
    }
}

/// A commit layer that only does bookkeeping. Granules are identified by their index relative
/// to address zero.
pub struct MockVirtualSpace {
    granule_words: usize,
    /// Maximum number of granules that may be committed at a time.
    limit_granules: Option<usize>,
    /// Makes every commit request fail.
    pub fail_commits: bool,
    committed: BTreeSet<usize>,
    pub commit_calls: usize,
    pub uncommit_calls: usize,
}

impl MockVirtualSpace {
    pub fn new(granule_words: usize) -> Self {
        MockVirtualSpace {
            granule_words,
            limit_granules: None,
            fail_commits: false,
            committed: BTreeSet::new(),
            commit_calls: 0,
            uncommit_calls: 0,
        }
    }

    pub fn with_limit(granule_words: usize, limit_granules: usize) -> Self {
        MockVirtualSpace {
            limit_granules: Some(limit_granules),
            ..Self::new(granule_words)
        }
    }

    fn granule_bytes(&self) -> usize {
        conversions::words_to_bytes(self.granule_words)
    }

    fn granules_of(&self, p: Address, word_size: usize) -> std::ops::Range<usize> {
        let granule_bytes = self.granule_bytes();
        let start = p.align_down(granule_bytes).as_usize() / granule_bytes;
        let end = p
            .add_words(word_size)
            .align_up(granule_bytes)
            .as_usize()
            / granule_bytes;
        start..end
    }

    pub fn committed_words(&self) -> usize {
        self.committed.len() * self.granule_words
    }

    pub fn is_range_committed(&self, p: Address, word_size: usize) -> bool {
        self.granules_of(p, word_size)
            .all(|g| self.committed.contains(&g))
    }
}

impl VirtualSpace for MockVirtualSpace {
    fn commit_granule_words(&self) -> usize {
        self.granule_words
    }

    fn ensure_range_is_committed(&mut self, p: Address, word_size: usize) -> bool {
        self.commit_calls += 1;
        if self.fail_commits {
            return false;
        }
        let missing = self
            .granules_of(p, word_size)
            .filter(|g| !self.committed.contains(g))
            .count();
        if let Some(limit) = self.limit_granules {
            if self.committed.len() + missing > limit {
                return false;
            }
        }
        for g in self.granules_of(p, word_size) {
            self.committed.insert(g);
        }
        true
    }

    fn uncommit_range(&mut self, p: Address, word_size: usize) {
        self.uncommit_calls += 1;
        for g in self.granules_of(p, word_size) {
            self.committed.remove(&g);
        }
    }
}
