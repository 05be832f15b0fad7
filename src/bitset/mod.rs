//! Atomic bit sets packed into 64-bit words.
//!
//! Bit `i` lives in word `i >> 6` at position `i & 63`. Every single-bit
//! update is a compare-and-swap loop on its word, so concurrent writers to
//! the same word never lose each other's bits.
//!
//! - [`HugeAtomicBitSet`]: fixed capacity.
//! - [`HugeAtomicGrowingBitSet`]: grows by reallocating its page list.
//! - [`HugeAtomicPagedBitSet`]: grows by publishing pages lazily.

use std::sync::atomic::{AtomicU64, Ordering};

mod fixed;
mod growing;
mod paged;

pub use fixed::HugeAtomicBitSet;
pub use growing::HugeAtomicGrowingBitSet;
pub use paged::HugeAtomicPagedBitSet;

const WORD_SHIFT: u32 = 6;
const WORD_BITS: usize = 1 << WORD_SHIFT;
const WORD_MASK: usize = WORD_BITS - 1;

/// Bit-page geometry shared by the growing variants: 65536 bits per page.
pub const PAGE_SHIFT_BITS: u32 = 16;
const PAGE_BITS: usize = 1 << PAGE_SHIFT_BITS;
const PAGE_WORDS: usize = PAGE_BITS / WORD_BITS;

#[inline]
const fn word_index(bit: usize) -> usize {
    bit >> WORD_SHIFT
}

#[inline]
const fn bit_mask(bit: usize) -> u64 {
    1 << (bit & WORD_MASK)
}

#[inline]
const fn words_for(bits: usize) -> usize {
    (bits + WORD_MASK) >> WORD_SHIFT
}

/// Applies `update` to `word` with a compare-and-swap loop. Returns the
/// previous value.
#[inline]
fn update_word(word: &AtomicU64, update: impl Fn(u64) -> u64) -> u64 {
    let mut current = word.load(Ordering::Acquire);
    loop {
        let next = update(current);
        if next == current {
            return current;
        }
        match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(previous) => return previous,
            Err(witness) => current = witness,
        }
    }
}

/// Mask of bits `[from, to)` within one word, `from < to <= 64`.
#[inline]
const fn range_mask(from: usize, to: usize) -> u64 {
    let high = if to == WORD_BITS { u64::MAX } else { (1u64 << to) - 1 };
    high & !((1u64 << from) - 1)
}

/// Sets bits `[from, to)` of `words`. Interior words are overwritten; the
/// boundary words only gain the in-range bits.
fn set_range_in_words(words: &[AtomicU64], from: usize, to: usize) {
    if from >= to {
        return;
    }
    let first = word_index(from);
    let last = word_index(to - 1);
    if first == last {
        let mask = range_mask(from & WORD_MASK, ((to - 1) & WORD_MASK) + 1);
        update_word(&words[first], |w| w | mask);
        return;
    }
    let head = range_mask(from & WORD_MASK, WORD_BITS);
    update_word(&words[first], |w| w | head);
    for word in &words[first + 1..last] {
        word.store(u64::MAX, Ordering::Release);
    }
    let tail = range_mask(0, ((to - 1) & WORD_MASK) + 1);
    update_word(&words[last], |w| w | tail);
}

/// Calls `consumer` with every set bit of `words` in ascending order, offset
/// by `base`.
fn for_each_set_bit_in(words: &[AtomicU64], base: usize, consumer: &mut impl FnMut(usize)) {
    for (index, word) in words.iter().enumerate() {
        let mut bits = word.load(Ordering::Acquire);
        while bits != 0 {
            let bit = bits.trailing_zeros() as usize;
            consumer(base + (index << WORD_SHIFT) + bit);
            bits &= bits - 1;
        }
    }
}

fn count_ones(words: &[AtomicU64]) -> usize {
    words
        .iter()
        .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
        .sum()
}

fn new_words(count: usize) -> Box<[AtomicU64]> {
    (0..count).map(|_| AtomicU64::new(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_masks() {
        assert_eq!(range_mask(0, 64), u64::MAX);
        assert_eq!(range_mask(0, 1), 1);
        assert_eq!(range_mask(3, 5), 0b11000);
        assert_eq!(range_mask(63, 64), 1 << 63);
    }

    #[test]
    fn set_range_touches_only_the_range() {
        let words = new_words(4);
        set_range_in_words(&words, 10, 200);
        let mut bits = Vec::new();
        for_each_set_bit_in(&words, 0, &mut |b| bits.push(b));
        assert_eq!(bits, (10..200).collect::<Vec<_>>());
        assert_eq!(count_ones(&words), 190);
    }

    #[test]
    fn update_word_returns_previous() {
        let word = AtomicU64::new(0b01);
        assert_eq!(update_word(&word, |w| w | 0b10), 0b01);
        assert_eq!(word.load(Ordering::Relaxed), 0b11);
    }
}
