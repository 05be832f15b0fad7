use rayon::prelude::*;
use tracing::debug;

use super::{mapped_index, original_index, IdMap};
use crate::arrays::{HugeLongArray, HugeSparseLongArray};
use crate::primitives::concurrency::Concurrency;
use crate::types::NOT_FOUND;

/// Id map built from the original id of every mapped id.
///
/// Mapped to original reads the input array; original to mapped reads a
/// page-sparse array filled in parallel at construction.
#[derive(Debug)]
pub struct ArrayIdMap {
    original_ids: HugeLongArray,
    mapped_ids: HugeSparseLongArray,
    highest_original_id: i64,
}

impl ArrayIdMap {
    /// Map where mapped id `i` has original id `original_ids[i]`.
    ///
    /// Original ids must be non-negative and distinct.
    #[track_caller]
    pub fn from_original_ids(original_ids: HugeLongArray, concurrency: Concurrency) -> Self {
        let builder = HugeSparseLongArray::builder(NOT_FOUND);
        let pages: Vec<(usize, &[i64])> = original_ids.pages().collect();
        let record = |(base, page): &(usize, &[i64])| {
            for (offset, &original) in page.iter().enumerate() {
                builder.set(original_index(original), (base + offset) as i64);
            }
        };
        if concurrency.is_sequential() {
            pages.iter().for_each(record);
        } else {
            pages
                .par_iter()
                .with_min_len(concurrency.min_len_for(pages.len()))
                .for_each(record);
        }
        let highest_original_id = original_ids.iter().max().unwrap_or(NOT_FOUND);
        let mapped_ids = builder.build();
        debug!(
            node_count = original_ids.size(),
            highest_original_id,
            "idmap.array.build"
        );
        Self {
            original_ids,
            mapped_ids,
            highest_original_id,
        }
    }

    /// Original ids indexed by mapped id.
    pub fn original_ids(&self) -> &HugeLongArray {
        &self.original_ids
    }
}

impl IdMap for ArrayIdMap {
    fn to_mapped_node_id(&self, original_id: i64) -> i64 {
        usize::try_from(original_id).map_or(NOT_FOUND, |index| self.mapped_ids.get(index))
    }

    fn to_original_node_id(&self, mapped_id: i64) -> i64 {
        mapped_index(mapped_id, self.original_ids.size())
            .map_or(NOT_FOUND, |index| self.original_ids.get(index))
    }

    fn node_count(&self) -> usize {
        self.original_ids.size()
    }

    fn highest_original_id(&self) -> i64 {
        self.highest_original_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_both_directions() {
        let originals = HugeLongArray::from_slice(&[40, 10, 1 << 20]);
        let map = ArrayIdMap::from_original_ids(originals, Concurrency::new(2));
        assert_eq!(map.to_mapped_node_id(10), 1);
        assert_eq!(map.to_mapped_node_id(1 << 20), 2);
        assert_eq!(map.to_mapped_node_id(11), NOT_FOUND);
        assert_eq!(map.to_mapped_node_id(-4), NOT_FOUND);
        assert_eq!(map.to_original_node_id(0), 40);
        assert_eq!(map.to_original_node_id(3), NOT_FOUND);
        assert!(map.contains_original_id(40));
        assert_eq!(map.node_count(), 3);
        assert_eq!(map.highest_original_id(), 1 << 20);
    }

    #[test]
    fn parallel_fill_over_pages() {
        let mut originals = HugeLongArray::new_paged(20_000);
        originals.set_all(|i| (i as i64) * 3);
        let map = ArrayIdMap::from_original_ids(originals, Concurrency::new(4));
        for mapped in [0i64, 4_095, 4_096, 19_999] {
            let original = map.to_original_node_id(mapped);
            assert_eq!(map.to_mapped_node_id(original), mapped);
        }
    }
}
