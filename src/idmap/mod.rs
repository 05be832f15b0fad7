//! Bidirectional mappings between original node ids and dense mapped ids.
//!
//! Three families share the [`IdMap`] query surface:
//!
//! - [`SparseIdMap`]: block bitset plus running counts over a bounded
//!   original-id domain.
//! - [`ShardedLongIdMap`] (and [`ShardedByteIdMap`] for byte keys):
//!   hash-sharded concurrent maps accepting arbitrary ids.
//! - [`ArrayIdMap`]: built from an array holding the original id of every
//!   mapped id.

mod array;
mod byte_map;
mod long_map;
mod shards;
mod sparse;

pub use array::ArrayIdMap;
pub use byte_map::{BatchedByteIdMapBuilder, ByteIdBatch, ShardedByteIdMap, ShardedByteIdMapBuilder};
pub use long_map::{BatchedLongIdMapBuilder, LongIdBatch, ShardedLongIdMap, ShardedLongIdMapBuilder};
pub use shards::{BatchedIdMapBuilder, IdBatch, ShardKey, ShardedIdMapBuilder};
pub use sparse::{
    GrowingSparseIdMapBuilder, SequentialSparseIdMapBuilder, SparseIdMap, SparseIdMapBuilder,
    BLOCK_SHIFT, BLOCK_SIZE,
};

use crate::types::NOT_FOUND;

/// Query surface of a built id map.
///
/// Lookups of absent ids return [`NOT_FOUND`].
pub trait IdMap: Send + Sync {
    /// Dense id of `original_id`.
    fn to_mapped_node_id(&self, original_id: i64) -> i64;

    /// Original id of `mapped_id`.
    fn to_original_node_id(&self, mapped_id: i64) -> i64;

    /// Whether `original_id` was added.
    fn contains_original_id(&self, original_id: i64) -> bool {
        self.to_mapped_node_id(original_id) != NOT_FOUND
    }

    /// Number of mapped ids; mapped ids are `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Largest original id, or [`NOT_FOUND`] when empty.
    fn highest_original_id(&self) -> i64;
}

/// `usize` position of a non-negative original id.
#[inline]
#[track_caller]
pub(crate) fn original_index(original_id: i64) -> usize {
    usize::try_from(original_id)
        .unwrap_or_else(|_| panic!("original id {original_id} is negative"))
}

/// Mapped id as an index, if it is in `0..node_count`.
#[inline]
pub(crate) fn mapped_index(mapped_id: i64, node_count: usize) -> Option<usize> {
    usize::try_from(mapped_id).ok().filter(|&i| i < node_count)
}
