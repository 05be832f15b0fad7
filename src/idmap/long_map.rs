use rayon::prelude::*;
use tracing::debug;

use super::shards::{BatchedIdMapBuilder, FrozenShards, IdBatch, ShardedIdMapBuilder};
use super::{mapped_index, IdMap};
use crate::arrays::{HugeAtomicLongArray, HugeLongArray};
use crate::primitives::concurrency::Concurrency;
use crate::types::NOT_FOUND;

/// Concurrent builder of a [`ShardedLongIdMap`].
pub type ShardedLongIdMapBuilder = ShardedIdMapBuilder<i64>;
/// Batched builder of a [`ShardedLongIdMap`].
pub type BatchedLongIdMapBuilder = BatchedIdMapBuilder<i64>;
/// Reserved id block of a [`BatchedLongIdMapBuilder`].
pub type LongIdBatch<'a> = IdBatch<'a, i64>;

/// Id map over arbitrary `i64` original ids.
///
/// Original to mapped is a lookup in the key's shard; mapped to original
/// reads a huge long array.
pub struct ShardedLongIdMap {
    shards: FrozenShards<i64>,
    original_ids: HugeLongArray,
    max_original_id: i64,
}

impl ShardedLongIdMap {
    /// Builder sized for `concurrency` writers.
    pub fn builder(concurrency: Concurrency) -> ShardedLongIdMapBuilder {
        ShardedIdMapBuilder::new(concurrency)
    }

    /// Batched builder sized for `concurrency` writers.
    pub fn batched_builder(concurrency: Concurrency) -> BatchedLongIdMapBuilder {
        BatchedIdMapBuilder::new(concurrency)
    }

    fn from_shards(shards: FrozenShards<i64>, node_count: usize) -> Self {
        let original_ids = HugeAtomicLongArray::new(node_count);
        shards.maps().par_iter().for_each(|map| {
            for (&original, &mapped) in map {
                original_ids.set(mapped as usize, original);
            }
        });
        let max_original_id = shards
            .maps()
            .par_iter()
            .flat_map_iter(|map| map.keys().copied())
            .max()
            .unwrap_or(NOT_FOUND);
        debug!(
            node_count,
            max_original_id,
            shards = shards.shard_count(),
            "idmap.sharded.build"
        );
        Self {
            shards,
            original_ids: original_ids.to_huge_array(),
            max_original_id,
        }
    }

    /// Dense id of `original_id`, or [`NOT_FOUND`].
    #[inline]
    pub fn to_mapped_node_id(&self, original_id: i64) -> i64 {
        self.shards.get(&original_id)
    }

    /// Original id of `mapped_id`, or [`NOT_FOUND`] outside `0..size()`.
    #[inline]
    pub fn to_original_node_id(&self, mapped_id: i64) -> i64 {
        mapped_index(mapped_id, self.original_ids.size())
            .map_or(NOT_FOUND, |index| self.original_ids.get(index))
    }

    /// Whether `original_id` was added.
    pub fn contains(&self, original_id: i64) -> bool {
        self.to_mapped_node_id(original_id) != NOT_FOUND
    }

    /// Number of mapped ids.
    pub fn size(&self) -> usize {
        self.original_ids.size()
    }

    /// Largest original id added, or [`NOT_FOUND`] when empty.
    pub fn max_original_id(&self) -> i64 {
        self.max_original_id
    }
}

impl IdMap for ShardedLongIdMap {
    fn to_mapped_node_id(&self, original_id: i64) -> i64 {
        ShardedLongIdMap::to_mapped_node_id(self, original_id)
    }

    fn to_original_node_id(&self, mapped_id: i64) -> i64 {
        ShardedLongIdMap::to_original_node_id(self, mapped_id)
    }

    fn node_count(&self) -> usize {
        self.size()
    }

    fn highest_original_id(&self) -> i64 {
        self.max_original_id
    }
}

impl ShardedIdMapBuilder<i64> {
    /// Freezes the added ids. Call after every writer has finished.
    pub fn build(self) -> ShardedLongIdMap {
        let (shards, node_count) = self.finish();
        ShardedLongIdMap::from_shards(shards, node_count)
    }
}

impl BatchedIdMapBuilder<i64> {
    /// Freezes the added ids, closing gaps left by partially used batches.
    /// Call after every writer has finished.
    pub fn build(self) -> ShardedLongIdMap {
        let (shards, node_count) = self.finish();
        ShardedLongIdMap::from_shards(shards, node_count)
    }
}
