//! Block-compressed id map over a bounded original-id domain.
//!
//! The original-id space is cut into blocks of [`BLOCK_SIZE`] ids. Each
//! block that holds at least one id keeps a bit vector of present ids (or
//! nothing, when every id of the block is present) and the number of ids in
//! all earlier blocks. Mapping an original id is a binary search over block
//! ids plus a population count; mapping back is a binary search over the
//! running counts plus a select within the block.

use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use tracing::debug;

use super::{mapped_index, original_index, IdMap};
use crate::primitives::concurrency::{AtomicSlot, Concurrency, SegmentedDirectory};
use crate::primitives::paging::{check_index, estimate, MemoryRange};
use crate::types::NOT_FOUND;

/// Bit shift from original id to block id.
pub const BLOCK_SHIFT: u32 = 12;
/// Original ids per block.
pub const BLOCK_SIZE: usize = 1 << BLOCK_SHIFT;
const BLOCK_MASK: usize = BLOCK_SIZE - 1;
const BLOCK_WORDS: usize = BLOCK_SIZE / 64;

#[derive(Clone, Debug)]
enum BlockBits {
    /// Every id of the block is present.
    Dense,
    Sparse(Box<[u64]>),
}

#[derive(Clone, Debug)]
struct Block {
    id: usize,
    offset: usize,
    bits: BlockBits,
}

impl Block {
    #[inline]
    fn contains(&self, bit: usize) -> bool {
        match &self.bits {
            BlockBits::Dense => true,
            BlockBits::Sparse(words) => words[bit >> 6] & (1 << (bit & 63)) != 0,
        }
    }
}

/// Position of the `k`-th set bit of `words`.
fn select(words: &[u64], mut k: usize) -> usize {
    for (index, &word) in words.iter().enumerate() {
        let ones = word.count_ones() as usize;
        if k < ones {
            let mut bits = word;
            for _ in 0..k {
                bits &= bits - 1;
            }
            return (index << 6) + bits.trailing_zeros() as usize;
        }
        k -= ones;
    }
    unreachable!("rank beyond block population")
}

/// Immutable sparse id map.
#[derive(Clone, Debug)]
pub struct SparseIdMap {
    blocks: Vec<Block>,
    node_count: usize,
    highest_original_id: i64,
}

impl SparseIdMap {
    /// Thread-safe builder for original ids below `capacity`.
    pub fn builder(capacity: usize) -> SparseIdMapBuilder {
        SparseIdMapBuilder::new(capacity)
    }

    /// Single-writer builder for original ids below `capacity`.
    pub fn sequential_builder(capacity: usize) -> SequentialSparseIdMapBuilder {
        SequentialSparseIdMapBuilder::new(capacity)
    }

    /// Thread-safe builder without an upper bound on original ids.
    pub fn growing_builder() -> GrowingSparseIdMapBuilder {
        GrowingSparseIdMapBuilder::new()
    }

    /// Assembles the map from blocks in ascending block order.
    fn from_blocks(blocks: impl IntoIterator<Item = (usize, Box<[u64]>)>) -> Self {
        let mut assembled: Vec<Block> = Vec::new();
        let mut offset = 0;
        let mut highest_original_id = NOT_FOUND;
        for (id, words) in blocks {
            debug_assert!(assembled.last().map_or(true, |b| b.id < id));
            let count: usize = words.iter().map(|w| w.count_ones() as usize).sum();
            let Some(last_word) = words.iter().rposition(|&w| w != 0) else {
                continue;
            };
            let last_bit = (last_word << 6) + 63 - words[last_word].leading_zeros() as usize;
            highest_original_id = ((id << BLOCK_SHIFT) + last_bit) as i64;
            let bits = if count == BLOCK_SIZE {
                BlockBits::Dense
            } else {
                BlockBits::Sparse(words)
            };
            assembled.push(Block { id, offset, bits });
            offset += count;
        }
        debug!(
            blocks = assembled.len(),
            node_count = offset,
            highest_original_id,
            "idmap.sparse.build"
        );
        Self {
            blocks: assembled,
            node_count: offset,
            highest_original_id,
        }
    }

    /// Dense id of `original_id`, or [`NOT_FOUND`].
    pub fn to_mapped_node_id(&self, original_id: i64) -> i64 {
        let Ok(index) = usize::try_from(original_id) else {
            return NOT_FOUND;
        };
        let Ok(position) = self
            .blocks
            .binary_search_by_key(&(index >> BLOCK_SHIFT), |b| b.id)
        else {
            return NOT_FOUND;
        };
        let block = &self.blocks[position];
        let bit = index & BLOCK_MASK;
        let rank = match &block.bits {
            BlockBits::Dense => bit,
            BlockBits::Sparse(words) => {
                let word = bit >> 6;
                let mask = 1u64 << (bit & 63);
                if words[word] & mask == 0 {
                    return NOT_FOUND;
                }
                let before: u32 = words[..word].iter().map(|w| w.count_ones()).sum();
                before as usize + (words[word] & (mask - 1)).count_ones() as usize
            }
        };
        (block.offset + rank) as i64
    }

    /// Original id of `mapped_id`, or [`NOT_FOUND`] outside `0..id_count()`.
    pub fn to_original_node_id(&self, mapped_id: i64) -> i64 {
        let Some(mapped) = mapped_index(mapped_id, self.node_count) else {
            return NOT_FOUND;
        };
        let position = self.blocks.partition_point(|b| b.offset <= mapped) - 1;
        let block = &self.blocks[position];
        let k = mapped - block.offset;
        let bit = match &block.bits {
            BlockBits::Dense => k,
            BlockBits::Sparse(words) => select(words, k),
        };
        ((block.id << BLOCK_SHIFT) + bit) as i64
    }

    /// Whether `original_id` is present.
    pub fn contains(&self, original_id: i64) -> bool {
        self.to_mapped_node_id(original_id) != NOT_FOUND
    }

    /// Number of present ids.
    pub fn id_count(&self) -> usize {
        self.node_count
    }

    /// Largest present original id, or [`NOT_FOUND`].
    pub fn highest_original_id(&self) -> i64 {
        self.highest_original_id
    }

    /// Original ids in mapped-id order.
    pub fn original_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.blocks.iter().flat_map(|block| {
            let base = block.id << BLOCK_SHIFT;
            (0..BLOCK_SIZE)
                .filter(move |&bit| block.contains(bit))
                .map(move |bit| (base + bit) as i64)
        })
    }

    /// Bytes for a map over ids up to `highest_id` holding `expected` ids.
    ///
    /// The best case packs the ids into dense blocks; the worst case spreads
    /// them over distinct blocks of the whole domain.
    pub fn memory_estimation(highest_id: usize, expected: usize) -> MemoryRange {
        let domain_blocks = highest_id.saturating_add(1).div_ceil(BLOCK_SIZE);
        let expected = expected.min(highest_id.saturating_add(1));
        let fixed = size_of::<Self>();
        let best_blocks = expected.div_ceil(BLOCK_SIZE);
        let worst_blocks = expected.min(domain_blocks);
        let blocks = MemoryRange::between(best_blocks, worst_blocks.max(best_blocks));
        // Dense blocks carry no bit vector; scattered blocks each carry one.
        let bit_vectors = MemoryRange::between(0, worst_blocks);
        MemoryRange::of(fixed)
            .add(blocks.times(estimate::size_of_array::<Block>(1)))
            .add(bit_vectors.times(estimate::size_of_array::<u64>(BLOCK_WORDS)))
    }
}

impl IdMap for SparseIdMap {
    fn to_mapped_node_id(&self, original_id: i64) -> i64 {
        SparseIdMap::to_mapped_node_id(self, original_id)
    }

    fn to_original_node_id(&self, mapped_id: i64) -> i64 {
        SparseIdMap::to_original_node_id(self, mapped_id)
    }

    fn node_count(&self) -> usize {
        self.node_count
    }

    fn highest_original_id(&self) -> i64 {
        self.highest_original_id
    }
}

fn new_block() -> Box<[AtomicU64]> {
    (0..BLOCK_WORDS).map(|_| AtomicU64::new(0)).collect()
}

#[inline]
fn mark(words: &[AtomicU64], index: usize) {
    let bit = index & BLOCK_MASK;
    words[bit >> 6].fetch_or(1 << (bit & 63), Ordering::AcqRel);
}

fn freeze(words: &[AtomicU64]) -> Box<[u64]> {
    words.iter().map(|w| w.load(Ordering::Acquire)).collect()
}

/// Thread-safe builder over a fixed original-id capacity.
///
/// Blocks are allocated on the first id written into them.
pub struct SparseIdMapBuilder {
    capacity: usize,
    blocks: Box<[AtomicSlot<Box<[AtomicU64]>>]>,
}

impl SparseIdMapBuilder {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            blocks: (0..capacity.div_ceil(BLOCK_SIZE))
                .map(|_| AtomicSlot::empty())
                .collect(),
        }
    }

    /// Exclusive upper bound on original ids.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn block(&self, block_id: usize) -> &[AtomicU64] {
        self.blocks[block_id].get_or_install(new_block)
    }

    /// Marks `original_id` present.
    ///
    /// # Panics
    ///
    /// Panics if `original_id` is negative or not below the capacity.
    #[track_caller]
    pub fn set(&self, original_id: i64) {
        let index = original_index(original_id);
        check_index(index, self.capacity);
        mark(self.block(index >> BLOCK_SHIFT), index);
    }

    /// Marks `batch[offset..offset + length]` present.
    #[track_caller]
    pub fn set_batch(&self, batch: &[i64], offset: usize, length: usize) {
        let mut current: Option<(usize, &[AtomicU64])> = None;
        for &original_id in &batch[offset..offset + length] {
            let index = original_index(original_id);
            check_index(index, self.capacity);
            let block_id = index >> BLOCK_SHIFT;
            let words = match current {
                Some((id, words)) if id == block_id => words,
                _ => {
                    let words = self.block(block_id);
                    current = Some((block_id, words));
                    words
                }
            };
            mark(words, index);
        }
    }

    /// Marks every id of `ids`, splitting the input over `concurrency` workers.
    pub fn set_parallel(&self, ids: &[i64], concurrency: Concurrency) {
        if concurrency.is_sequential() {
            self.set_batch(ids, 0, ids.len());
            return;
        }
        let chunk = concurrency.min_len_for(ids.len());
        ids.par_chunks(chunk)
            .for_each(|part| self.set_batch(part, 0, part.len()));
    }

    /// Number of blocks allocated so far.
    pub fn allocated_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_installed()).count()
    }

    /// Freezes the marked ids. Call after every writer has finished.
    pub fn build(mut self) -> SparseIdMap {
        let blocks: Vec<(usize, Box<[u64]>)> = self
            .blocks
            .iter_mut()
            .enumerate()
            .filter_map(|(id, slot)| slot.take().map(|words| (id, freeze(&words))))
            .collect();
        SparseIdMap::from_blocks(blocks)
    }
}

/// Single-writer builder over a fixed original-id capacity.
#[derive(Debug)]
pub struct SequentialSparseIdMapBuilder {
    capacity: usize,
    blocks: Vec<Option<Box<[u64]>>>,
}

impl SequentialSparseIdMapBuilder {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            blocks: vec![None; capacity.div_ceil(BLOCK_SIZE)],
        }
    }

    /// Marks `original_id` present.
    #[track_caller]
    pub fn set(&mut self, original_id: i64) {
        let index = original_index(original_id);
        check_index(index, self.capacity);
        let words = self.blocks[index >> BLOCK_SHIFT]
            .get_or_insert_with(|| vec![0; BLOCK_WORDS].into_boxed_slice());
        let bit = index & BLOCK_MASK;
        words[bit >> 6] |= 1 << (bit & 63);
    }

    /// Marks `batch[offset..offset + length]` present.
    #[track_caller]
    pub fn set_batch(&mut self, batch: &[i64], offset: usize, length: usize) {
        for &original_id in &batch[offset..offset + length] {
            self.set(original_id);
        }
    }

    /// Number of blocks allocated so far.
    pub fn allocated_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }

    /// Freezes the marked ids.
    pub fn build(self) -> SparseIdMap {
        SparseIdMap::from_blocks(
            self.blocks
                .into_iter()
                .enumerate()
                .filter_map(|(id, words)| words.map(|w| (id, w))),
        )
    }
}

/// Thread-safe builder accepting any non-negative original id.
#[derive(Default)]
pub struct GrowingSparseIdMapBuilder {
    blocks: SegmentedDirectory<Box<[AtomicU64]>>,
}

impl GrowingSparseIdMapBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Marks `original_id` present.
    #[track_caller]
    pub fn set(&self, original_id: i64) {
        let index = original_index(original_id);
        mark(
            self.blocks.get_or_install(index >> BLOCK_SHIFT, new_block),
            index,
        );
    }

    /// Marks `batch[offset..offset + length]` present.
    #[track_caller]
    pub fn set_batch(&self, batch: &[i64], offset: usize, length: usize) {
        for &original_id in &batch[offset..offset + length] {
            self.set(original_id);
        }
    }

    /// Number of blocks allocated so far.
    pub fn allocated_blocks(&self) -> usize {
        self.blocks.iter().count()
    }

    /// Freezes the marked ids. Call after every writer has finished.
    pub fn build(self) -> SparseIdMap {
        SparseIdMap::from_blocks(
            self.blocks
                .into_values()
                .into_iter()
                .map(|(id, words)| (id, freeze(&words))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_id_in_small_capacity() {
        let builder = SparseIdMap::builder(42);
        builder.set(23);
        let map = builder.build();
        assert_eq!(map.to_mapped_node_id(23), 0);
        assert_eq!(map.to_original_node_id(0), 23);
        for id in (0..42).filter(|&id| id != 23) {
            assert_eq!(map.to_mapped_node_id(id), NOT_FOUND);
        }
        assert_eq!(map.id_count(), 1);
        assert_eq!(map.highest_original_id(), 23);
        assert_eq!(map.to_original_node_id(1), NOT_FOUND);
        assert_eq!(map.to_mapped_node_id(-5), NOT_FOUND);
    }

    #[test]
    fn every_seventh_id() {
        let mut builder = SparseIdMap::sequential_builder(8_421);
        let ids: Vec<i64> = (0..=8_420).step_by(7).collect();
        builder.set_batch(&ids, 0, ids.len());
        let map = builder.build();
        for id in 0..=8_420i64 {
            let expected = if id % 7 == 0 { id / 7 } else { NOT_FOUND };
            assert_eq!(map.to_mapped_node_id(id), expected, "original id {id}");
        }
        for (mapped, &original) in ids.iter().enumerate() {
            assert_eq!(map.to_original_node_id(mapped as i64), original);
        }
        assert_eq!(map.original_ids().collect::<Vec<_>>(), ids);
    }

    #[test]
    fn full_blocks_are_stored_dense() {
        let builder = SparseIdMap::builder(3 * BLOCK_SIZE);
        builder.set_parallel(
            &(BLOCK_SIZE as i64..2 * BLOCK_SIZE as i64 + 1).collect::<Vec<_>>(),
            Concurrency::new(4),
        );
        let map = builder.build();
        assert!(matches!(map.blocks[0].bits, BlockBits::Dense));
        assert!(matches!(map.blocks[1].bits, BlockBits::Sparse(_)));
        assert_eq!(map.to_mapped_node_id(BLOCK_SIZE as i64), 0);
        assert_eq!(map.to_mapped_node_id(2 * BLOCK_SIZE as i64), BLOCK_SIZE as i64);
        assert_eq!(map.to_original_node_id(100), BLOCK_SIZE as i64 + 100);
        assert_eq!(map.id_count(), BLOCK_SIZE + 1);
    }

    #[test]
    fn blocks_are_allocated_lazily() {
        let builder = SparseIdMap::builder(100 * BLOCK_SIZE);
        assert_eq!(builder.allocated_blocks(), 0);
        builder.set(5 * BLOCK_SIZE as i64 + 1);
        builder.set(5 * BLOCK_SIZE as i64 + 2);
        assert_eq!(builder.allocated_blocks(), 1);
    }

    #[test]
    #[should_panic(expected = "index 42 out of bounds for length 42")]
    fn set_past_capacity_panics() {
        SparseIdMap::builder(42).set(42);
    }

    #[test]
    fn growing_builder_accepts_far_ids() {
        let builder = SparseIdMap::growing_builder();
        builder.set(1 << 33);
        builder.set(7);
        builder.set_batch(&[1, 2, 3], 1, 2);
        let map = builder.build();
        assert_eq!(map.id_count(), 4);
        assert_eq!(map.to_mapped_node_id(1 << 33), 3);
        assert_eq!(map.to_original_node_id(3), 1 << 33);
        assert_eq!(map.to_mapped_node_id(1), NOT_FOUND);
        assert_eq!(map.highest_original_id(), 1 << 33);
    }

    #[test]
    fn empty_map() {
        let map = SparseIdMap::builder(10).build();
        assert_eq!(map.id_count(), 0);
        assert_eq!(map.highest_original_id(), NOT_FOUND);
        assert_eq!(map.to_original_node_id(0), NOT_FOUND);
        assert!(!map.contains(3));
    }

    #[test]
    fn estimation_orders_best_and_worst() {
        let range = SparseIdMap::memory_estimation(1 << 30, 100_000);
        assert!(range.min < range.max);
        let tiny = SparseIdMap::memory_estimation(0, 0);
        assert_eq!(tiny.min, tiny.max);
    }
}
