//! Top-down merge sort over huge long arrays.
//!
//! Values are sorted in place using one scratch array of the same layout. The
//! parallel sort forks halves onto the rayon pool while the fork budget
//! (`log2(concurrency)` levels) lasts and the range is large enough; the
//! indirect sort orders elements by an external key and stays sequential.

use std::cmp::Ordering;

use tracing::debug;

use super::huge::HugeLongArray;
use super::storage::HugeSliceMut;
use crate::config::CollectionsConfig;
use crate::primitives::concurrency::Concurrency;

/// Ranges at or below this length are insertion sorted.
const INSERTION_SORT_THRESHOLD: usize = 32;

/// Default minimum range length forked onto another worker.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1 << 13;

/// Parallel merge sort for [`HugeLongArray`].
#[derive(Copy, Clone, Debug)]
pub struct HugeMergeSort {
    concurrency: Concurrency,
    parallel_threshold: usize,
}

impl HugeMergeSort {
    /// Sorter forking onto at most `concurrency` workers.
    pub fn new(concurrency: Concurrency) -> Self {
        Self {
            concurrency,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }

    /// Sorter configured from `config`.
    pub fn from_config(config: &CollectionsConfig) -> Self {
        Self::new(config.concurrency()).with_parallel_threshold(config.parallel_sort_threshold)
    }

    /// Ranges shorter than `threshold` are never forked.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(2);
        self
    }

    fn fork_depth(&self) -> u32 {
        let workers = self.concurrency.value();
        usize::BITS - (workers - 1).leading_zeros()
    }

    /// Sorts `array` ascending in place.
    pub fn sort(&self, array: &mut HugeLongArray) {
        let size = array.size();
        if size < 2 {
            return;
        }
        debug!(size, concurrency = %self.concurrency, "sort.merge.start");
        let mut scratch = if array.is_paged() {
            HugeLongArray::new_paged(size)
        } else {
            HugeLongArray::new_single(size)
        };
        let mut data = array.as_slice_mut();
        let mut buffer = scratch.as_slice_mut();
        sort_parallel(&mut data, &mut buffer, self.fork_depth(), self.parallel_threshold);
    }
}

/// Sorts `array` ascending with `concurrency` workers.
pub fn merge_sort(array: &mut HugeLongArray, concurrency: Concurrency) {
    HugeMergeSort::new(concurrency).sort(array);
}

/// Sorts the first `size` elements of `array` by `key(element)` ascending.
///
/// Keys compare with `f64::total_cmp`. Runs on the calling thread.
#[track_caller]
pub fn sort_indirect(array: &mut HugeLongArray, size: usize, key: impl Fn(i64) -> f64) {
    assert!(
        size <= array.size(),
        "sort length {size} exceeds array size {}",
        array.size()
    );
    if size < 2 {
        return;
    }
    let mut scratch = if array.is_paged() {
        HugeLongArray::new_paged(size)
    } else {
        HugeLongArray::new_single(size)
    };
    let mut full = array.as_slice_mut();
    let (mut data, _) = full.split_at_mut(size);
    let mut buffer = scratch.as_slice_mut();
    let compare = |a: &i64, b: &i64| key(*a).total_cmp(&key(*b));
    sort_sequential(&mut data, &mut buffer, &compare);
}

fn sort_parallel(
    data: &mut HugeSliceMut<'_, i64>,
    scratch: &mut HugeSliceMut<'_, i64>,
    depth: u32,
    threshold: usize,
) {
    let len = data.len();
    if depth == 0 || len < threshold {
        sort_sequential(data, scratch, &i64::cmp);
        return;
    }
    let mid = len / 2;
    {
        let (mut left, mut right) = data.split_at_mut(mid);
        let (mut left_buf, mut right_buf) = scratch.split_at_mut(mid);
        rayon::join(
            || sort_parallel(&mut left, &mut left_buf, depth - 1, threshold),
            || sort_parallel(&mut right, &mut right_buf, depth - 1, threshold),
        );
    }
    merge_halves(data, scratch, mid, &i64::cmp);
}

fn sort_sequential<C>(data: &mut HugeSliceMut<'_, i64>, scratch: &mut HugeSliceMut<'_, i64>, compare: &C)
where
    C: Fn(&i64, &i64) -> Ordering,
{
    let len = data.len();
    if len <= INSERTION_SORT_THRESHOLD {
        insertion_sort(data, compare);
        return;
    }
    let mid = len / 2;
    {
        let (mut left, mut right) = data.split_at_mut(mid);
        let (mut left_buf, mut right_buf) = scratch.split_at_mut(mid);
        sort_sequential(&mut left, &mut left_buf, compare);
        sort_sequential(&mut right, &mut right_buf, compare);
    }
    merge_halves(data, scratch, mid, compare);
}

/// Merges the sorted runs `[0, mid)` and `[mid, len)` of `data`.
fn merge_halves<C>(data: &mut HugeSliceMut<'_, i64>, scratch: &mut HugeSliceMut<'_, i64>, mid: usize, compare: &C)
where
    C: Fn(&i64, &i64) -> Ordering,
{
    if compare(data.get(mid - 1), data.get(mid)) != Ordering::Greater {
        return;
    }
    data.copy_into(scratch);
    let len = data.len();
    if let (Some(out), Some(src)) = (data.as_contiguous(), scratch.as_contiguous()) {
        merge_slices(&src[..mid], &src[mid..], out, compare);
        return;
    }
    let (mut i, mut j, mut k) = (0, mid, 0);
    while i < mid && j < len {
        let (a, b) = (*scratch.get(i), *scratch.get(j));
        if compare(&a, &b) != Ordering::Greater {
            data.set(k, a);
            i += 1;
        } else {
            data.set(k, b);
            j += 1;
        }
        k += 1;
    }
    while i < mid {
        data.set(k, *scratch.get(i));
        i += 1;
        k += 1;
    }
    while j < len {
        data.set(k, *scratch.get(j));
        j += 1;
        k += 1;
    }
}

fn merge_slices<C>(left: &[i64], right: &[i64], out: &mut [i64], compare: &C)
where
    C: Fn(&i64, &i64) -> Ordering,
{
    let (mut i, mut j) = (0, 0);
    for slot in out.iter_mut() {
        let take_left = j == right.len() || (i < left.len() && compare(&left[i], &right[j]) != Ordering::Greater);
        if take_left {
            *slot = left[i];
            i += 1;
        } else {
            *slot = right[j];
            j += 1;
        }
    }
}

fn insertion_sort<C>(data: &mut HugeSliceMut<'_, i64>, compare: &C)
where
    C: Fn(&i64, &i64) -> Ordering,
{
    if let Some(values) = data.as_contiguous() {
        for i in 1..values.len() {
            let current = values[i];
            let mut j = i;
            while j > 0 && compare(&values[j - 1], &current) == Ordering::Greater {
                values[j] = values[j - 1];
                j -= 1;
            }
            values[j] = current;
        }
        return;
    }
    for i in 1..data.len() {
        let current = *data.get(i);
        let mut j = i;
        while j > 0 && compare(data.get(j - 1), &current) == Ordering::Greater {
            let shifted = *data.get(j - 1);
            data.set(j, shifted);
            j -= 1;
        }
        data.set(j, current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_array(size: usize, paged: bool, seed: u64) -> (HugeLongArray, Vec<i64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let values: Vec<i64> = (0..size).map(|_| rng.gen()).collect();
        let mut array = if paged {
            HugeLongArray::new_paged(size)
        } else {
            HugeLongArray::new_single(size)
        };
        array.copy_from_slice(0, &values);
        (array, values)
    }

    #[test]
    fn sorts_both_layouts_at_any_concurrency() {
        for paged in [false, true] {
            for workers in [1, 4] {
                for size in [0usize, 1, 2, 31, 33, 4_097, 50_000] {
                    let (mut array, mut expected) = random_array(size, paged, size as u64);
                    HugeMergeSort::new(Concurrency::new(workers))
                        .with_parallel_threshold(1_000)
                        .sort(&mut array);
                    expected.sort_unstable();
                    assert_eq!(array.to_vec(), expected, "size {size} paged {paged} workers {workers}");
                }
            }
        }
    }

    #[test]
    fn fork_depth_is_log2_of_workers() {
        assert_eq!(HugeMergeSort::new(Concurrency::new(1)).fork_depth(), 0);
        assert_eq!(HugeMergeSort::new(Concurrency::new(2)).fork_depth(), 1);
        assert_eq!(HugeMergeSort::new(Concurrency::new(4)).fork_depth(), 2);
        assert_eq!(HugeMergeSort::new(Concurrency::new(5)).fork_depth(), 3);
    }

    #[test]
    fn indirect_sort_orders_by_key() {
        let mut array = HugeLongArray::new_paged(10_000);
        array.set_all(|i| i as i64);
        let key = |v: i64| -((v % 100) as f64);
        sort_indirect(&mut array, 10_000, key);
        let keys: Vec<f64> = array.iter().map(key).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        let mut values = array.to_vec();
        values.sort_unstable();
        assert_eq!(values, (0..10_000).collect::<Vec<i64>>());
    }

    #[test]
    fn indirect_sort_leaves_suffix_untouched() {
        let mut array = HugeLongArray::from_slice(&[5, 3, 1, 0, -1]);
        sort_indirect(&mut array, 3, |v| v as f64);
        assert_eq!(array.to_vec(), vec![1, 3, 5, 0, -1]);
    }
}
