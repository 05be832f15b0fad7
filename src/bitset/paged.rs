use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::{
    bit_mask, count_ones, for_each_set_bit_in, new_words, set_range_in_words, update_word,
    word_index, PAGE_BITS, PAGE_SHIFT_BITS, PAGE_WORDS,
};
use crate::primitives::concurrency::SegmentedDirectory;

/// Atomic bit set whose pages are published lazily.
///
/// Pages live in an append-only directory of write-once slots. The first
/// write to a page installs it with compare-and-swap; concurrent writers that
/// lose the race use the installed page. Readers never block.
pub struct HugeAtomicPagedBitSet {
    pages: SegmentedDirectory<Box<[AtomicU64]>>,
    capacity: AtomicUsize,
}

impl HugeAtomicPagedBitSet {
    /// Bit set reporting at least `bit_size` bits of capacity. No page is
    /// allocated until written.
    pub fn create(bit_size: usize) -> Self {
        Self {
            pages: SegmentedDirectory::new(),
            capacity: AtomicUsize::new(bit_size.div_ceil(PAGE_BITS) << PAGE_SHIFT_BITS),
        }
    }

    /// Current capacity in bits, a whole number of pages.
    pub fn size(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    #[inline]
    fn split(index: usize) -> (usize, usize) {
        (index >> PAGE_SHIFT_BITS, index & (PAGE_BITS - 1))
    }

    fn page_for_write(&self, page: usize) -> &[AtomicU64] {
        let words = self.pages.get_or_install(page, || {
            tracing::trace!(page, "bitset.paged.install");
            new_words(PAGE_WORDS)
        });
        self.capacity
            .fetch_max((page + 1) << PAGE_SHIFT_BITS, Ordering::AcqRel);
        words
    }

    /// Whether bit `index` is set. Unallocated pages read as unset.
    pub fn get(&self, index: usize) -> bool {
        let (page, bit) = Self::split(index);
        self.pages.get(page).is_some_and(|words| {
            words[word_index(bit)].load(Ordering::Acquire) & bit_mask(bit) != 0
        })
    }

    /// Sets bit `index`, allocating its page when needed.
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

    /// Toggles bit `index`.
    pub fn flip(&self, index: usize) {
        let (page, bit) = Self::split(index);
        let mask = bit_mask(bit);
        update_word(&self.page_for_write(page)[word_index(bit)], |w| w ^ mask);
    }

    /// Clears bit `index` without allocating.
    pub fn clear(&self, index: usize) {
        let (page, bit) = Self::split(index);
        if let Some(words) = self.pages.get(page) {
            let mask = bit_mask(bit);
            update_word(&words[word_index(bit)], |w| w & !mask);
        }
    }

    /// Sets bits `[from, to)`, allocating the touched pages.
    #[track_caller]
    pub fn set_range(&self, from: usize, to: usize) {
        assert!(from <= to, "range start {from} exceeds end {to}");
        let mut start = from;
        while start < to {
            let (page, offset) = Self::split(start);
            let end = to.min((page + 1) << PAGE_SHIFT_BITS);
            set_range_in_words(self.page_for_write(page), offset, offset + (end - start));
            start = end;
        }
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.pages.iter().map(|(_, words)| count_ones(words)).sum()
    }

    /// Calls `consumer` with every set bit in ascending order.
    pub fn for_each_set_bit(&self, mut consumer: impl FnMut(usize)) {
        for (page, words) in self.pages.iter() {
            for_each_set_bit_in(words, page << PAGE_SHIFT_BITS, &mut consumer);
        }
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.pages
            .iter()
            .all(|(_, words)| words.iter().all(|w| w.load(Ordering::Acquire) == 0))
    }

    /// Number of pages allocated so far.
    pub fn allocated_pages(&self) -> usize {
        self.pages.iter().count()
    }
}

impl std::fmt::Debug for HugeAtomicPagedBitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HugeAtomicPagedBitSet")
            .field("capacity", &self.size())
            .field("pages", &self.allocated_pages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pages_are_allocated_on_first_write() {
        let bits = HugeAtomicPagedBitSet::create(10 * PAGE_BITS);
        assert_eq!(bits.allocated_pages(), 0);
        assert!(!bits.get(5));
        bits.clear(5);
        assert_eq!(bits.allocated_pages(), 0);
        bits.set(3 * PAGE_BITS);
        assert_eq!(bits.allocated_pages(), 1);
        assert!(bits.get(3 * PAGE_BITS));
    }

    #[test]
    fn each_page_is_independent() {
        let bits = HugeAtomicPagedBitSet::create(0);
        for page in 0..5 {
            bits.set(page * PAGE_BITS + page);
        }
        for page in 0..5 {
            assert!(bits.get(page * PAGE_BITS + page));
            assert!(!bits.get(page * PAGE_BITS + page + 1));
        }
        assert_eq!(bits.cardinality(), 5);
        assert_eq!(bits.size(), 5 * PAGE_BITS);
    }

    #[test]
    fn range_across_pages() {
        let bits = HugeAtomicPagedBitSet::create(0);
        bits.set_range(PAGE_BITS - 10, 2 * PAGE_BITS + 10);
        assert_eq!(bits.cardinality(), PAGE_BITS + 20);
        assert!(!bits.get(PAGE_BITS - 11));
        assert!(!bits.get(2 * PAGE_BITS + 10));
        assert_eq!(bits.allocated_pages(), 3);
    }

    #[test]
    fn racing_writers_install_one_page() {
        let bits = Arc::new(HugeAtomicPagedBitSet::create(0));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let bits = Arc::clone(&bits);
                thread::spawn(move || bits.set(7 * PAGE_BITS + t))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bits.allocated_pages(), 1);
        assert_eq!(bits.cardinality(), 8);
    }

    #[test]
    fn flip_and_get_and_set() {
        let bits = HugeAtomicPagedBitSet::create(0);
        assert!(!bits.get_and_set(1));
        assert!(bits.get_and_set(1));
        bits.flip(1);
        bits.flip(2);
        assert!(!bits.get(1));
        assert!(bits.get(2));
        let mut seen = Vec::new();
        bits.for_each_set_bit(|i| seen.push(i));
        assert_eq!(seen, vec![2]);
        bits.clear(2);
        assert!(bits.is_empty());
    }
}
