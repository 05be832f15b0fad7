//! Hash-sharded builders shared by the long and byte id maps.
//!
//! Keys are spread over a power-of-two number of shards, each a hash map
//! behind its own mutex, so inserts of keys in different shards never
//! contend. Dense ids come from one shared atomic counter.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHasher;
use tracing::debug;

use crate::config::{CollectionsConfig, DEFAULT_SHARDS_PER_THREAD};
use crate::primitives::concurrency::Concurrency;
use crate::types::NOT_FOUND;

/// Key types accepted by the sharded id maps.
pub trait ShardKey: Hash + Eq + Sync {
    /// Owned form stored in the shard maps.
    type Owned: Borrow<Self> + Hash + Eq + Send + Sync;
    /// Hasher of the shard maps.
    type BuildHasher: BuildHasher + Default + Send + Sync;

    /// Hash selecting the shard of this key.
    fn shard_hash(&self) -> u64;

    /// Owned copy of this key.
    fn to_owned_key(&self) -> Self::Owned;
}

/// 64-bit finalizer of MurmurHash3.
#[inline]
pub(crate) fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

impl ShardKey for i64 {
    type Owned = i64;
    type BuildHasher = BuildHasherDefault<FxHasher>;

    #[inline]
    fn shard_hash(&self) -> u64 {
        fmix64(*self as u64)
    }

    #[inline]
    fn to_owned_key(&self) -> i64 {
        *self
    }
}

impl ShardKey for [u8] {
    type Owned = Box<[u8]>;
    type BuildHasher = ahash::RandomState;

    #[inline]
    fn shard_hash(&self) -> u64 {
        xxhash_rust::xxh64::xxh64(self, 0)
    }

    fn to_owned_key(&self) -> Box<[u8]> {
        self.into()
    }
}

pub(crate) type ShardMap<K> =
    HashMap<<K as ShardKey>::Owned, i64, <K as ShardKey>::BuildHasher>;

/// Encodes an already-present mapped id as a negative value.
#[inline]
pub(crate) fn encode_duplicate(existing: i64) -> i64 {
    -(existing + 1)
}

struct Shards<K: ShardKey + ?Sized> {
    maps: Box<[Mutex<ShardMap<K>>]>,
    mask: usize,
}

impl<K: ShardKey + ?Sized> Shards<K> {
    fn new(concurrency: Concurrency, shards_per_thread: usize) -> Self {
        let count = (concurrency.value() * shards_per_thread.max(1)).next_power_of_two();
        Self {
            maps: (0..count).map(|_| Mutex::new(ShardMap::<K>::default())).collect(),
            mask: count - 1,
        }
    }

    /// Inserts `key` with `allocate()` unless present. Returns the new id, or
    /// the encoded existing id.
    fn insert(&self, key: &K, allocate: impl FnOnce() -> i64) -> i64 {
        let shard = &self.maps[key.shard_hash() as usize & self.mask];
        let mut map = shard.lock();
        if let Some(&existing) = map.get(key) {
            return encode_duplicate(existing);
        }
        let mapped = allocate();
        map.insert(key.to_owned_key(), mapped);
        mapped
    }

    fn len(&self) -> usize {
        self.maps.iter().map(|m| m.lock().len()).sum()
    }

    fn freeze(self) -> FrozenShards<K> {
        FrozenShards {
            maps: self
                .maps
                .into_vec()
                .into_iter()
                .map(Mutex::into_inner)
                .collect(),
            mask: self.mask,
        }
    }
}

/// Read-only shard maps of a built id map.
pub(crate) struct FrozenShards<K: ShardKey + ?Sized> {
    maps: Box<[ShardMap<K>]>,
    mask: usize,
}

impl<K: ShardKey + ?Sized> FrozenShards<K> {
    #[inline]
    pub(crate) fn get(&self, key: &K) -> i64 {
        self.maps[key.shard_hash() as usize & self.mask]
            .get(key)
            .copied()
            .unwrap_or(NOT_FOUND)
    }

    pub(crate) fn maps(&self) -> &[ShardMap<K>] {
        &self.maps
    }

    pub(crate) fn shard_count(&self) -> usize {
        self.maps.len()
    }

    /// Renumbers ids to `0..len` preserving their order. Returns the number
    /// of ids and how many reserved ids were never used.
    fn compact(&mut self, allocated: i64) -> (usize, usize) {
        let mut ids: Vec<i64> = self
            .maps
            .par_iter()
            .flat_map_iter(|m| m.values().copied())
            .collect();
        let count = ids.len();
        let reclaimed = usize::try_from(allocated).unwrap_or(0).saturating_sub(count);
        if reclaimed == 0 {
            return (count, 0);
        }
        ids.par_sort_unstable();
        self.maps.par_iter_mut().for_each(|map| {
            for mapped in map.values_mut() {
                *mapped = ids.partition_point(|&id| id < *mapped) as i64;
            }
        });
        (count, reclaimed)
    }
}

/// Concurrent builder assigning each new key the next dense id.
pub struct ShardedIdMapBuilder<K: ShardKey + ?Sized> {
    shards: Shards<K>,
    next_id: AtomicI64,
}

impl<K: ShardKey + ?Sized> ShardedIdMapBuilder<K> {
    /// Builder sized for `concurrency` writers.
    ///
    /// Creates `concurrency *` [`DEFAULT_SHARDS_PER_THREAD`] shards rounded up
    /// to the next power of two, so a key's shard is its hash masked by the
    /// shard count minus one. Three writers get 16 shards.
    pub fn new(concurrency: Concurrency) -> Self {
        Self::with_shards(concurrency, DEFAULT_SHARDS_PER_THREAD)
    }

    /// Builder sized from `config`, with `config.shards_per_thread` in place
    /// of the default shards per writer.
    pub fn from_config(config: &CollectionsConfig) -> Self {
        Self::with_shards(config.concurrency(), config.shards_per_thread)
    }

    fn with_shards(concurrency: Concurrency, shards_per_thread: usize) -> Self {
        Self {
            shards: Shards::new(concurrency, shards_per_thread),
            next_id: AtomicI64::new(0),
        }
    }

    /// Adds `key`. Returns its new dense id, or `-(existing + 1)` when the
    /// key was added before.
    pub fn add_node(&self, key: &K) -> i64 {
        self.shards
            .insert(key, || self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Number of distinct keys added.
    pub fn size(&self) -> usize {
        self.next_id.load(Ordering::Acquire) as usize
    }

    pub(crate) fn finish(self) -> (FrozenShards<K>, usize) {
        let node_count = self.size();
        (self.shards.freeze(), node_count)
    }
}

/// Builder that hands out dense ids in per-batch blocks.
///
/// Each [`IdBatch`] reserves its ids with a single counter update. Ids of a
/// batch that are left unused become gaps, which building removes by
/// renumbering the ids in order. Ids returned by a batch are therefore final
/// only when no batch ended with unused ids.
pub struct BatchedIdMapBuilder<K: ShardKey + ?Sized> {
    shards: Shards<K>,
    next_id: AtomicI64,
}

impl<K: ShardKey + ?Sized> BatchedIdMapBuilder<K> {
    /// Builder sized for `concurrency` writers.
    ///
    /// Creates `concurrency *` [`DEFAULT_SHARDS_PER_THREAD`] shards rounded up
    /// to the next power of two, so a key's shard is its hash masked by the
    /// shard count minus one. Three writers get 16 shards.
    pub fn new(concurrency: Concurrency) -> Self {
        Self::with_shards(concurrency, DEFAULT_SHARDS_PER_THREAD)
    }

    /// Builder sized from `config`, with `config.shards_per_thread` in place
    /// of the default shards per writer.
    pub fn from_config(config: &CollectionsConfig) -> Self {
        Self::with_shards(config.concurrency(), config.shards_per_thread)
    }

    fn with_shards(concurrency: Concurrency, shards_per_thread: usize) -> Self {
        Self {
            shards: Shards::new(concurrency, shards_per_thread),
            next_id: AtomicI64::new(0),
        }
    }

    /// Reserves `size` consecutive ids for one writer.
    pub fn prepare_batch(&self, size: usize) -> IdBatch<'_, K> {
        let start = self.next_id.fetch_add(size as i64, Ordering::AcqRel);
        IdBatch {
            shards: &self.shards,
            next: start,
            end: start + size as i64,
        }
    }

    /// Number of distinct keys added.
    pub fn size(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn finish(self) -> (FrozenShards<K>, usize) {
        let allocated = self.next_id.load(Ordering::Acquire);
        let mut shards = self.shards.freeze();
        let (node_count, reclaimed) = shards.compact(allocated);
        debug!(node_count, allocated, reclaimed, "idmap.sharded.compact");
        (shards, node_count)
    }
}

/// Block of reserved ids handed to one writer.
pub struct IdBatch<'a, K: ShardKey + ?Sized> {
    shards: &'a Shards<K>,
    next: i64,
    end: i64,
}

impl<K: ShardKey + ?Sized> IdBatch<'_, K> {
    /// Adds `key` with the next reserved id. Returns that id, or
    /// `-(existing + 1)` when the key was added before; duplicates do not
    /// consume a reserved id.
    ///
    /// # Panics
    ///
    /// Panics when every reserved id is used and `key` is new.
    #[track_caller]
    pub fn add_node(&mut self, key: &K) -> i64 {
        let next = &mut self.next;
        let end = self.end;
        self.shards.insert(key, || {
            assert!(*next < end, "id batch exhausted");
            let id = *next;
            *next += 1;
            id
        })
    }

    /// Reserved ids not yet used.
    pub fn remaining(&self) -> usize {
        (self.end - self.next) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_count_is_a_power_of_two() {
        let shards = Shards::<i64>::new(Concurrency::new(3), 4);
        assert_eq!(shards.maps.len(), 16);
    }

    #[test]
    fn builders_round_shard_counts_up() {
        let sharded = ShardedIdMapBuilder::<i64>::new(Concurrency::new(3));
        assert_eq!(sharded.shards.maps.len(), 16);
        let batched = BatchedIdMapBuilder::<i64>::new(Concurrency::new(5));
        assert_eq!(batched.shards.maps.len(), 32);
        let config = CollectionsConfig {
            concurrency: 3,
            shards_per_thread: 1,
            ..CollectionsConfig::default()
        };
        assert_eq!(ShardedIdMapBuilder::<i64>::from_config(&config).shards.maps.len(), 4);
    }

    #[test]
    fn duplicates_are_encoded() {
        let builder = ShardedIdMapBuilder::<i64>::new(Concurrency::new(2));
        assert_eq!(builder.add_node(&100), 0);
        assert_eq!(builder.add_node(&200), 1);
        assert_eq!(builder.add_node(&100), -1);
        assert_eq!(builder.add_node(&200), -2);
        assert_eq!(builder.size(), 2);
    }

    #[test]
    fn batches_skip_duplicates_and_compact_gaps() {
        let builder = BatchedIdMapBuilder::<i64>::new(Concurrency::new(2));
        let mut first = builder.prepare_batch(3);
        let mut second = builder.prepare_batch(2);
        assert_eq!(first.add_node(&10), 0);
        assert_eq!(first.add_node(&10), -1);
        assert_eq!(second.add_node(&20), 3);
        assert_eq!(first.add_node(&30), 1);
        assert_eq!(first.remaining(), 1);
        let (shards, count) = builder.finish();
        assert_eq!(count, 3);
        assert_eq!(shards.get(&10), 0);
        assert_eq!(shards.get(&30), 1);
        assert_eq!(shards.get(&20), 2);
        assert_eq!(shards.get(&40), NOT_FOUND);
    }

    #[test]
    #[should_panic(expected = "id batch exhausted")]
    fn exhausted_batch_panics() {
        let builder = BatchedIdMapBuilder::<[u8]>::new(Concurrency::SEQUENTIAL);
        let mut batch = builder.prepare_batch(1);
        batch.add_node(b"a");
        batch.add_node(b"b");
    }

    #[test]
    fn fmix_spreads_sequential_keys() {
        let shards: std::collections::HashSet<u64> = (0..64i64).map(|k| k.shard_hash() & 15).collect();
        assert!(shards.len() > 8);
    }
}
