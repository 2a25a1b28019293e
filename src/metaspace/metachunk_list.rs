use crate::metaspace::metachunk::{ChunkPtr, Metachunk};

/// A doubly linked list of chunks, threaded through [`Metachunk::prev`] and
/// [`Metachunk::next`]. A chunk can be in at most one list at a time. New chunks are added at
/// the front.
#[derive(Default)]
pub struct MetachunkList {
    first: Option<ChunkPtr>,
    num_chunks: usize,
    word_size: usize,
}

impl MetachunkList {
    pub const fn new() -> Self {
        MetachunkList {
            first: None,
            num_chunks: 0,
            word_size: 0,
        }
    }

    pub fn first(&self) -> Option<ChunkPtr> {
        self.first
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Number of chunks in the list.
    pub fn count(&self) -> usize {
        self.num_chunks
    }

    /// Combined word size of the chunks in the list.
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    /// Add `c` at the front.
    ///
    /// # Safety
    /// `c` must be a live chunk that is not in any list.
    pub unsafe fn add(&mut self, mut c: ChunkPtr) {
        debug_assert!(!self.contains(c), "chunk is already in the list");
        let chunk = c.as_mut();
        debug_assert!(chunk.prev().is_none() && chunk.next().is_none());
        chunk.set_next(self.first);
        if let Some(mut first) = self.first {
            first.as_mut().set_prev(Some(c));
        }
        self.first = Some(c);
        self.num_chunks += 1;
        self.word_size += chunk.word_size();
    }

    /// Unlink and return the first chunk.
    pub fn remove_first(&mut self) -> Option<ChunkPtr> {
        let c = self.first?;
        unsafe { self.remove(c) };
        Some(c)
    }

    /// Unlink `c`.
    ///
    /// # Safety
    /// `c` must be in this list.
    pub unsafe fn remove(&mut self, mut c: ChunkPtr) {
        debug_assert!(self.contains(c), "chunk is not in the list");
        let chunk = c.as_mut();
        let (prev, next) = (chunk.prev(), chunk.next());
        match prev {
            Some(mut p) => p.as_mut().set_next(next),
            None => self.first = next,
        }
        if let Some(mut n) = next {
            n.as_mut().set_prev(prev);
        }
        chunk.set_prev(None);
        chunk.set_next(None);
        self.num_chunks -= 1;
        self.word_size -= chunk.word_size();
    }

    pub fn contains(&self, c: ChunkPtr) -> bool {
        self.iter().any(|x| x == c)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.first,
            _list: self,
        }
    }

    /// Check the links, the counters, and every chunk in the list. Panics on violation.
    pub fn verify(&self) {
        let mut count = 0;
        let mut word_size = 0;
        let mut prev: Option<ChunkPtr> = None;
        for c in self.iter() {
            let chunk: &Metachunk = unsafe { c.as_ref() };
            assert_eq!(chunk.prev(), prev, "broken back link at chunk {}", chunk.base());
            chunk.verify();
            count += 1;
            word_size += chunk.word_size();
            prev = Some(c);
        }
        assert_eq!(count, self.num_chunks, "chunk count mismatch");
        assert_eq!(word_size, self.word_size, "word size mismatch");
    }
}

pub struct Iter<'a> {
    current: Option<ChunkPtr>,
    _list: &'a MetachunkList,
}

impl Iterator for Iter<'_> {
    type Item = ChunkPtr;

    fn next(&mut self) -> Option<ChunkPtr> {
        let c = self.current?;
        self.current = unsafe { c.as_ref() }.next();
        Some(c)
    }
}
