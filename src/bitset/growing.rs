use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{
    bit_mask, count_ones, for_each_set_bit_in, set_range_in_words, update_word, word_index,
    PAGE_BITS, PAGE_SHIFT_BITS, PAGE_WORDS,
};
use crate::primitives::concurrency::GrowingDirectory;

type Page = [AtomicU64];

fn new_page(_: usize) -> Arc<Page> {
    (0..PAGE_WORDS).map(|_| AtomicU64::new(0)).collect()
}

/// Atomic bit set that grows on demand.
///
/// Capacity is a whole number of 65536-bit pages. A write past the capacity
/// grows the page list inside a short exclusive section; every other access is
/// lock-free and keeps working against the page list it loaded.
pub struct HugeAtomicGrowingBitSet {
    pages: GrowingDirectory<Page>,
}

impl HugeAtomicGrowingBitSet {
    /// Bit set with capacity for at least `bit_size` bits.
    pub fn create(bit_size: usize) -> Self {
        let pages = (0..bit_size.div_ceil(PAGE_BITS)).map(new_page).collect();
        Self {
            pages: GrowingDirectory::new(pages),
        }
    }

    /// Current capacity in bits.
    pub fn size(&self) -> usize {
        self.pages.len() << PAGE_SHIFT_BITS
    }

    #[inline]
    fn split(index: usize) -> (usize, usize) {
        (index >> PAGE_SHIFT_BITS, index & (PAGE_BITS - 1))
    }

    fn page_for_write(&self, page: usize) -> &Page {
        let pages = self.pages.pages();
        if page < pages.len() {
            return &pages[page];
        }
        tracing::debug!(page, capacity = self.size(), "bitset.grow");
        &self.pages.grow_to(page + 1, new_page)[page]
    }

    /// Whether bit `index` is set. Bits past the capacity read as unset.
    pub fn get(&self, index: usize) -> bool {
        let (page, bit) = Self::split(index);
        self.pages.pages().get(page).is_some_and(|words| {
            words[word_index(bit)].load(Ordering::Acquire) & bit_mask(bit) != 0
        })
    }

    /// Sets bit `index`, growing when needed.
    pub fn set(&self, index: usize) {
        let (page, bit) = Self::split(index);
        let mask = bit_mask(bit);
        update_word(&self.page_for_write(page)[word_index(bit)], |w| w | mask);
    }

    /// Sets bit `index`, returning whether it was already set.
    pub fn get_and_set(&self, index: usize) -> bool {
        let (page, bit) = Self::split(index);
        let mask = bit_mask(bit);
        update_word(&self.page_for_write(page)[word_index(bit)], |w| w | mask) & mask != 0
    }

    /// Toggles bit `index`, growing when needed.
    pub fn flip(&self, index: usize) {
        let (page, bit) = Self::split(index);
        let mask = bit_mask(bit);
        update_word(&self.page_for_write(page)[word_index(bit)], |w| w ^ mask);
    }

    /// Clears bit `index`. Clearing past the capacity is a no-op.
    pub fn clear(&self, index: usize) {
        let (page, bit) = Self::split(index);
        if let Some(words) = self.pages.pages().get(page) {
            let mask = bit_mask(bit);
            update_word(&words[word_index(bit)], |w| w & !mask);
        }
    }

    /// Sets bits `[from, to)`, growing when needed.
    #[track_caller]
    pub fn set_range(&self, from: usize, to: usize) {
        assert!(from <= to, "range start {from} exceeds end {to}");
        if from == to {
            return;
        }
        let (last_page, _) = Self::split(to - 1);
        self.page_for_write(last_page);
        let pages = self.pages.pages();
        let mut start = from;
        while start < to {
            let (page, offset) = Self::split(start);
            let end = to.min((page + 1) << PAGE_SHIFT_BITS);
            set_range_in_words(&pages[page], offset, offset + (end - start));
            start = end;
        }
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.pages.pages().iter().map(|p| count_ones(p)).sum()
    }

    /// Calls `consumer` with every set bit in ascending order.
    pub fn for_each_set_bit(&self, mut consumer: impl FnMut(usize)) {
        for (index, page) in self.pages.pages().iter().enumerate() {
            for_each_set_bit_in(page, index << PAGE_SHIFT_BITS, &mut consumer);
        }
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.pages
            .pages()
            .iter()
            .all(|p| p.iter().all(|w| w.load(Ordering::Acquire) == 0))
    }

    #[cfg(test)]
    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl std::fmt::Debug for HugeAtomicGrowingBitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HugeAtomicGrowingBitSet")
            .field("capacity", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn capacity_is_page_granular() {
        let bits = HugeAtomicGrowingBitSet::create(10);
        assert_eq!(bits.size(), PAGE_BITS);
        assert_eq!(HugeAtomicGrowingBitSet::create(0).size(), 0);
    }

    #[test]
    fn writes_in_later_pages_grow_without_disturbing_earlier_pages() {
        let bits = HugeAtomicGrowingBitSet::create(1);
        for page in 0..4 {
            bits.set(page * PAGE_BITS + 7);
        }
        assert!(bits.page_count() >= 4);
        for page in 0..4 {
            assert!(bits.get(page * PAGE_BITS + 7));
            assert!(!bits.get(page * PAGE_BITS + 8));
        }
        assert_eq!(bits.cardinality(), 4);
        assert!(!bits.get(1 << 40));
    }

    #[test]
    fn range_beyond_capacity_grows_and_stays_exact() {
        let bits = HugeAtomicGrowingBitSet::create(0);
        bits.set_range(PAGE_BITS - 3, PAGE_BITS + 5);
        assert_eq!(bits.cardinality(), 8);
        assert!(!bits.get(PAGE_BITS - 4));
        assert!(!bits.get(PAGE_BITS + 5));
        let mut seen = Vec::new();
        bits.for_each_set_bit(|i| seen.push(i));
        assert_eq!(seen, (PAGE_BITS - 3..PAGE_BITS + 5).collect::<Vec<_>>());
    }

    #[test]
    fn flip_clear_and_get_and_set() {
        let bits = HugeAtomicGrowingBitSet::create(0);
        assert!(!bits.get_and_set(3));
        assert!(bits.get_and_set(3));
        bits.flip(3);
        assert!(!bits.get(3));
        bits.flip(200_000);
        assert!(bits.get(200_000));
        bits.clear(200_000);
        bits.clear(1 << 40);
        assert!(bits.is_empty());
    }

    #[test]
    fn concurrent_growth_keeps_every_bit() {
        let bits = HugeAtomicGrowingBitSet::create(0);
        thread::scope(|scope| {
            for t in 0..4 {
                let bits = &bits;
                scope.spawn(move || {
                    for i in (t..400_000).step_by(4) {
                        bits.set(i);
                    }
                });
            }
        });
        assert_eq!(bits.cardinality(), 400_000);
    }
}
