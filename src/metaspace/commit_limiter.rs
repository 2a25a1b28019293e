use std::sync::atomic::{AtomicUsize, Ordering};

/// Caps the number of words committed by a set of virtual space nodes.
///
/// Nodes reserve words from the limiter before they commit memory. A reservation that would
/// exceed the cap fails, and the node does not commit. Reservations are atomic, so nodes of
/// different contexts can share one limiter without a common lock.
#[derive(Debug)]
pub struct CommitLimiter {
    /// 0 means there is no cap.
    cap_words: usize,
    committed_words: AtomicUsize,
}

impl CommitLimiter {
    pub const fn new(cap_words: usize) -> Self {
        CommitLimiter {
            cap_words,
            committed_words: AtomicUsize::new(0),
        }
    }

    pub const fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn cap_words(&self) -> usize {
        self.cap_words
    }

    pub fn is_limited(&self) -> bool {
        self.cap_words != 0
    }

    pub fn committed_words(&self) -> usize {
        self.committed_words.load(Ordering::Relaxed)
    }

    /// How many more words may be committed.
    pub fn possible_expansion_words(&self) -> usize {
        if !self.is_limited() {
            return usize::MAX;
        }
        self.cap_words.saturating_sub(self.committed_words())
    }

    /// Account for `words` about to be committed. Returns false, and accounts for nothing, if
    /// that would exceed the cap. A reservation that is not committed after all must be given
    /// back with [`CommitLimiter::decrease_committed`].
    pub fn try_reserve(&self, words: usize) -> bool {
        if !self.is_limited() {
            self.committed_words.fetch_add(words, Ordering::Relaxed);
            return true;
        }
        let mut old = self.committed_words.load(Ordering::Relaxed);
        loop {
            let new = match old.checked_add(words) {
                Some(new) if new <= self.cap_words => new,
                _ => return false,
            };
            match self.committed_words.compare_exchange_weak(
                old,
                new,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => old = current,
            }
        }
    }

    pub fn decrease_committed(&self, words: usize) {
        let old = self.committed_words.fetch_sub(words, Ordering::Relaxed);
        debug_assert!(old >= words, "uncommitted more than was committed");
    }
}

impl Default for CommitLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
