use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{
    bit_mask, count_ones, for_each_set_bit_in, new_words, set_range_in_words, update_word,
    word_index, words_for, WORD_MASK, WORD_SHIFT,
};
use crate::primitives::paging::{check_index, estimate};

/// Fixed-capacity atomic bit set.
///
/// Bits at or beyond [`size`](Self::size) are never set, including the
/// padding in the last word.
pub struct HugeAtomicBitSet {
    words: Box<[AtomicU64]>,
    num_bits: usize,
}

impl HugeAtomicBitSet {
    /// Bit set of `size` cleared bits.
    pub fn new(size: usize) -> Self {
        Self {
            words: new_words(words_for(size)),
            num_bits: size,
        }
    }

    /// Number of addressable bits.
    pub fn size(&self) -> usize {
        self.num_bits
    }

    /// Bytes needed for a bit set of `size` bits.
    pub fn memory_estimation(size: usize) -> usize {
        size_of::<Self>() + estimate::size_of_array::<AtomicU64>(words_for(size))
    }

    #[inline]
    #[track_caller]
    fn word(&self, index: usize) -> &AtomicU64 {
        check_index(index, self.num_bits);
        &self.words[word_index(index)]
    }

    /// Whether bit `index` is set.
    #[inline]
    #[track_caller]
    pub fn get(&self, index: usize) -> bool {
        self.word(index).load(Ordering::Acquire) & bit_mask(index) != 0
    }

    /// Sets bit `index`.
    #[track_caller]
    pub fn set(&self, index: usize) {
        let mask = bit_mask(index);
        update_word(self.word(index), |w| w | mask);
    }

    /// Sets bits `[from, to)`.
    ///
    /// # Panics
    ///
    /// Panics if `from > to` or `to > size`.
    #[track_caller]
    pub fn set_range(&self, from: usize, to: usize) {
        assert!(from <= to, "range start {from} exceeds end {to}");
        assert!(
            to <= self.num_bits,
            "range end {to} out of bounds for length {}",
            self.num_bits
        );
        set_range_in_words(&self.words, from, to);
    }

    /// Sets bit `index`, returning whether it was already set.
    #[track_caller]
    pub fn get_and_set(&self, index: usize) -> bool {
        let mask = bit_mask(index);
        update_word(self.word(index), |w| w | mask) & mask != 0
    }

    /// Toggles bit `index`.
    #[track_caller]
    pub fn flip(&self, index: usize) {
        let mask = bit_mask(index);
        update_word(self.word(index), |w| w ^ mask);
    }

    /// Clears bit `index`.
    #[track_caller]
    pub fn clear(&self, index: usize) {
        let mask = bit_mask(index);
        update_word(self.word(index), |w| w & !mask);
    }

    /// Clears every bit.
    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        count_ones(&self.words)
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }

    /// Whether every bit below `size` is set.
    pub fn all_set(&self) -> bool {
        let full = self.num_bits >> WORD_SHIFT;
        if !self.words[..full]
            .iter()
            .all(|w| w.load(Ordering::Acquire) == u64::MAX)
        {
            return false;
        }
        let rest = self.num_bits & WORD_MASK;
        rest == 0 || {
            let mask = (1u64 << rest) - 1;
            self.words[full].load(Ordering::Acquire) & mask == mask
        }
    }

    /// Calls `consumer` with every set bit in ascending order.
    pub fn for_each_set_bit(&self, mut consumer: impl FnMut(usize)) {
        for_each_set_bit_in(&self.words, 0, &mut consumer);
    }

    /// Ascending iterator over set bits. Each call starts a new scan.
    pub fn iter_set_bits(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = 0;
        std::iter::from_fn(move || {
            let found = self.next_set_bit(next)?;
            next = found + 1;
            Some(found)
        })
    }

    /// First set bit at or after `from`.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        if from >= self.num_bits {
            return None;
        }
        let mut index = word_index(from);
        let mut bits = self.words[index].load(Ordering::Acquire) & (u64::MAX << (from & WORD_MASK));
        loop {
            if bits != 0 {
                let bit = (index << WORD_SHIFT) + bits.trailing_zeros() as usize;
                return (bit < self.num_bits).then_some(bit);
            }
            index += 1;
            if index == self.words.len() {
                return None;
            }
            bits = self.words[index].load(Ordering::Acquire);
        }
    }

    #[cfg(test)]
    pub(crate) fn raw_word(&self, index: usize) -> u64 {
        self.words[index].load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for HugeAtomicBitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HugeAtomicBitSet")
            .field("size", &self.num_bits)
            .field("words", &self.words.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn single_bit_operations() {
        let bits = HugeAtomicBitSet::new(100);
        assert!(!bits.get(42));
        bits.set(42);
        assert!(bits.get(42));
        assert!(bits.get_and_set(42));
        assert!(!bits.get_and_set(43));
        bits.flip(42);
        assert!(!bits.get(42));
        bits.flip(42);
        assert!(bits.get(42));
        bits.clear(42);
        assert!(!bits.get(42));
        assert_eq!(bits.cardinality(), 1);
    }

    #[test]
    #[should_panic(expected = "index 100 out of bounds for length 100")]
    fn get_past_size_panics() {
        HugeAtomicBitSet::new(100).get(100);
    }

    #[test]
    fn range_set_respects_size_padding() {
        let bits = HugeAtomicBitSet::new(70);
        bits.set_range(60, 70);
        assert_eq!(bits.cardinality(), 10);
        assert_eq!(bits.raw_word(1), 0b11_1111);
        assert!((0..60).all(|i| !bits.get(i)));
        bits.set_range(0, 70);
        assert!(bits.all_set());
        assert_eq!(bits.raw_word(1) >> 6, 0);
    }

    #[test]
    fn range_set_within_one_word() {
        let bits = HugeAtomicBitSet::new(64);
        bits.set_range(3, 5);
        assert_eq!(bits.raw_word(0), 0b11000);
        bits.set_range(7, 7);
        assert_eq!(bits.cardinality(), 2);
    }

    #[test]
    fn iteration_is_ascending_and_restartable() {
        let bits = HugeAtomicBitSet::new(1_000);
        for i in [999, 0, 64, 65, 500] {
            bits.set(i);
        }
        let first: Vec<usize> = bits.iter_set_bits().collect();
        assert_eq!(first, vec![0, 64, 65, 500, 999]);
        assert_eq!(bits.iter_set_bits().collect::<Vec<_>>(), first);
        let mut seen = Vec::new();
        bits.for_each_set_bit(|i| seen.push(i));
        assert_eq!(seen, first);
        assert_eq!(bits.next_set_bit(66), Some(500));
        assert_eq!(bits.next_set_bit(1_000), None);
    }

    #[test]
    fn empty_and_full_checks() {
        let bits = HugeAtomicBitSet::new(128);
        assert!(bits.is_empty());
        assert!(!bits.all_set());
        bits.set_range(0, 128);
        assert!(bits.all_set());
        bits.clear_all();
        assert!(bits.is_empty());
        assert!(HugeAtomicBitSet::new(0).all_set());
    }

    #[test]
    fn concurrent_flips_on_one_word_are_not_lost() {
        // Thread t owns bits t, t + 8, ... of the same word. Bits in even
        // bytes are flipped an odd number of times and end up set; bits in
        // odd bytes are flipped an even number of times and end up clear.
        let bits = Arc::new(HugeAtomicBitSet::new(64));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let bits = Arc::clone(&bits);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for round in 0..1_001 {
                        for i in (t..64).step_by(8) {
                            if round < 1_000 || (i / 8) % 2 == 0 {
                                bits.flip(i);
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bits.raw_word(0), 0x00FF_00FF_00FF_00FF);
        assert_eq!(bits.cardinality(), 32);
    }

    #[test]
    fn estimation_counts_words() {
        assert_eq!(
            HugeAtomicBitSet::memory_estimation(65) - HugeAtomicBitSet::memory_estimation(64),
            8
        );
    }
}
