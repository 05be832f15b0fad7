use tracing::debug;

use super::mapped_index;
use super::shards::{BatchedIdMapBuilder, FrozenShards, IdBatch, ShardedIdMapBuilder};
use crate::arrays::HugeObjectArray;
use crate::primitives::concurrency::Concurrency;
use crate::types::NOT_FOUND;

/// Concurrent builder of a [`ShardedByteIdMap`].
pub type ShardedByteIdMapBuilder = ShardedIdMapBuilder<[u8]>;
/// Batched builder of a [`ShardedByteIdMap`].
pub type BatchedByteIdMapBuilder = BatchedIdMapBuilder<[u8]>;
/// Reserved id block of a [`BatchedByteIdMapBuilder`].
pub type ByteIdBatch<'a> = IdBatch<'a, [u8]>;

/// Id map over byte-sequence original ids.
pub struct ShardedByteIdMap {
    shards: FrozenShards<[u8]>,
    original_ids: HugeObjectArray<Box<[u8]>>,
}

impl ShardedByteIdMap {
    /// Builder sized for `concurrency` writers.
    pub fn builder(concurrency: Concurrency) -> ShardedByteIdMapBuilder {
        ShardedIdMapBuilder::new(concurrency)
    }

    /// Batched builder sized for `concurrency` writers.
    pub fn batched_builder(concurrency: Concurrency) -> BatchedByteIdMapBuilder {
        BatchedIdMapBuilder::new(concurrency)
    }

    fn from_shards(shards: FrozenShards<[u8]>, node_count: usize) -> Self {
        let mut original_ids = HugeObjectArray::new(node_count);
        for map in shards.maps() {
            for (original, &mapped) in map {
                original_ids.set(mapped as usize, original.clone());
            }
        }
        debug!(node_count, shards = shards.shard_count(), "idmap.sharded_bytes.build");
        Self {
            shards,
            original_ids,
        }
    }

    /// Dense id of `original_id`, or [`NOT_FOUND`].
    pub fn to_mapped_node_id(&self, original_id: &[u8]) -> i64 {
        self.shards.get(original_id)
    }

    /// Original id of `mapped_id`, `None` outside `0..size()`.
    pub fn to_original_node_id(&self, mapped_id: i64) -> Option<&[u8]> {
        let index = mapped_index(mapped_id, self.original_ids.size())?;
        self.original_ids.get(index).map(|key| &key[..])
    }

    /// Whether `original_id` was added.
    pub fn contains(&self, original_id: &[u8]) -> bool {
        self.to_mapped_node_id(original_id) != NOT_FOUND
    }

    /// Number of mapped ids.
    pub fn size(&self) -> usize {
        self.original_ids.size()
    }
}

impl ShardedIdMapBuilder<[u8]> {
    /// Freezes the added keys. Call after every writer has finished.
    pub fn build(self) -> ShardedByteIdMap {
        let (shards, node_count) = self.finish();
        ShardedByteIdMap::from_shards(shards, node_count)
    }
}

impl BatchedIdMapBuilder<[u8]> {
    /// Freezes the added keys, closing gaps left by partially used batches.
    pub fn build(self) -> ShardedByteIdMap {
        let (shards, node_count) = self.finish();
        ShardedByteIdMap::from_shards(shards, node_count)
    }
}
