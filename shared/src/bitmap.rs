//! A fixed-length bitmap, used to track swap slot allocation.

use alloc::{vec, vec::Vec};

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// Creates a bitmap of `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bit {idx} out of bounds ({})", self.len);
        self.words[idx / WORD_BITS] >> (idx % WORD_BITS) & 1 != 0
    }

    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    pub fn set(&mut self, idx: usize, value: bool) {
        assert!(idx < self.len, "bit {idx} out of bounds ({})", self.len);
        let mask = 1 << (idx % WORD_BITS);
        let word = &mut self.words[idx / WORD_BITS];
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Finds the first bit at or after `start` equal to `value`, flips it and
    /// returns its index.
    pub fn scan_and_flip(&mut self, start: usize, value: bool) -> Option<usize> {
        let idx = (start..self.len).find(|&idx| self.get(idx) == value)?;
        self.set(idx, !value);
        Some(idx)
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }
}
