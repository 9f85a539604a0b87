//! Word-packed atomic bitset used for per-field dirty tracking.
//!
//! Operator threads call [`DirtyBitset::set`] concurrently while computing;
//! the sync round then claims bits with [`DirtyBitset::test_and_clear`] or walks
//! them with [`DirtyBitset::iter_ones`]. Each bit is claimed by exactly one
//! caller of `test_and_clear`.

use super::{AtomicUsize, Ordering};

const WORD_BITS: usize = usize::BITS as usize;

/// A fixed-size concurrent bitset indexed by host-local node id.
pub struct DirtyBitset {
    bits: usize,
    words: Box<[AtomicUsize]>,
}

impl DirtyBitset {
    /// Creates a bitset with `bits` bits, all cleared.
    pub fn new(bits: usize) -> Self {
        let words = (0..bits.div_ceil(WORD_BITS))
            .map(|_| AtomicUsize::new(0))
            .collect();
        Self { bits, words }
    }

    /// Number of addressable bits.
    pub fn len(&self) -> usize {
        self.bits
    }

    /// True if the bitset has no addressable bits.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Marks `bit` dirty. Returns `true` if it was previously clear.
    ///
    /// # Panics
    /// Panics if `bit >= len()`.
    #[inline]
    pub fn set(&self, bit: usize) -> bool {
        let (word, mask) = self.locate(bit);
        (self.words[word].fetch_or(mask, Ordering::AcqRel) & mask) == 0
    }

    /// Returns whether `bit` is dirty.
    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        let (word, mask) = self.locate(bit);
        (self.words[word].load(Ordering::Acquire) & mask) != 0
    }

    /// Clears `bit` and returns whether this call observed it set.
    #[inline]
    pub fn test_and_clear(&self, bit: usize) -> bool {
        let (word, mask) = self.locate(bit);
        (self.words[word].fetch_and(!mask, Ordering::AcqRel) & mask) != 0
    }

    /// Clears every bit.
    pub fn clear_all(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Release);
        }
    }

    /// True if any bit is set.
    pub fn any(&self) -> bool {
        self.words.iter().any(|w| w.load(Ordering::Acquire) != 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    /// Iterates over set bits in ascending order.
    ///
    /// Each word is snapshotted once; bits set concurrently may or may not be seen.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, w)| {
            let mut word = w.load(Ordering::Acquire);
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let tz = word.trailing_zeros() as usize;
                word &= word - 1;
                Some(wi * WORD_BITS + tz)
            })
        })
    }

    #[inline(always)]
    fn locate(&self, bit: usize) -> (usize, usize) {
        assert!(bit < self.bits, "bit {bit} out of range for {} bits", self.bits);
        (bit / WORD_BITS, 1usize << (bit % WORD_BITS))
    }
}

impl std::fmt::Debug for DirtyBitset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyBitset")
            .field("bits", &self.bits)
            .field("set", &self.count_ones())
            .finish()
    }
}
