use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-size bitset whose individual bits can be set and cleared concurrently.
///
/// Used for every per-state-set vector that other threads touch: dirty bits (set by writers,
/// cleared by the owner), monitored bits, the event mask and the event flag values.
///
/// # Panics
///
/// Every per-bit operation panics on an index at or past [`len`](Self::len).
pub struct Bitmask {
    words: Box<[AtomicU64]>,
    len: usize,
}

impl Bitmask {
    /// Construct a new [`Bitmask`] of `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { words, len }
    }

    /// Number of addressable bits.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set bit `index`, returning whether it was already set.
    pub fn set(&self, index: usize) -> bool {
        let (word, bit) = self.locate(index);
        self.words[word].fetch_or(bit, Ordering::AcqRel) & bit != 0
    }

    /// Clear bit `index`, returning whether it was set.
    pub fn clear(&self, index: usize) -> bool {
        let (word, bit) = self.locate(index);
        self.words[word].fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    pub fn test(&self, index: usize) -> bool {
        let (word, bit) = self.locate(index);
        self.words[word].load(Ordering::Acquire) & bit != 0
    }

    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|w| w.load(Ordering::Acquire) != 0)
    }

    /// Indices of the set bits in ascending order, scanned a word at a time.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(n, word)| {
            let mut bits = word.load(Ordering::Acquire);
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let offset = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(n * WORD_BITS + offset)
            })
        })
    }

    /// Copy out the raw words, e.g. to save a mask before temporarily replacing it.
    pub fn to_words(&self) -> Vec<u64> {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire))
            .collect()
    }

    /// Overwrite the mask with words previously taken by [`to_words`](Self::to_words).
    pub fn store_words(&self, words: &[u64]) {
        for (dst, src) in self.words.iter().zip(words.iter().copied()) {
            dst.store(src, Ordering::Release);
        }
    }

    fn locate(&self, index: usize) -> (usize, u64) {
        assert!(
            index < self.len,
            "bit index {index} out of range for mask of {} bits",
            self.len
        );
        (index / WORD_BITS, 1 << (index % WORD_BITS))
    }
}

impl fmt::Debug for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Most significant word first.
        for (n, word) in self.to_words().iter().enumerate().rev() {
            if n + 1 != self.words.len() {
                f.write_str("'")?;
            }
            write!(f, "{word:064b}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_and_test() {
        let mask = Bitmask::new(70);
        assert!(!mask.any());

        assert!(!mask.set(3));
        assert!(mask.set(3));
        assert!(!mask.set(69));

        assert!(mask.test(3));
        assert!(mask.test(69));
        assert!(!mask.test(4));

        assert!(mask.clear(3));
        assert!(!mask.clear(3));
        assert!(!mask.test(3));
        assert!(mask.any());
    }

    #[test]
    fn test_iter_ones_spans_words() {
        let mask = Bitmask::new(130);
        for i in [0, 63, 64, 100, 129] {
            mask.set(i);
        }

        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![0, 63, 64, 100, 129]);

        mask.clear_all();
        assert_eq!(mask.iter_ones().count(), 0);
    }

    #[test]
    fn test_save_and_restore_words() {
        let mask = Bitmask::new(10);
        mask.set(1);
        mask.set(7);
        let saved = mask.to_words();

        mask.clear_all();
        mask.set(2);
        mask.store_words(&saved);

        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![1, 7]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        Bitmask::new(8).set(8);
    }
}
