//! Huge primitive arrays addressed by 64-bit indices.
//!
//! A [`HugeArray`] keeps its elements either in one allocation (single
//! layout) or in fixed-size pages (paged layout). [`HugeArray::new`] picks the
//! single layout while the size stays within
//! [`MAX_ARRAY_LENGTH`](crate::primitives::paging::MAX_ARRAY_LENGTH); callers
//! can force either layout. Both layouts behave identically, including the
//! out-of-bounds panic, and report the same memory estimation for a size.

use std::fmt;
use std::mem::size_of;

use tracing::trace;

use super::storage::{HugeSliceMut, Storage};
use crate::primitives::concurrency::{for_each_parallel, Concurrency};
use crate::primitives::pages::PageCreator;
use crate::primitives::paging::{check_index, estimate, PageLayout, MAX_ARRAY_LENGTH};

/// Element types storable in a [`HugeArray`].
pub trait HugeElement: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Page geometry for this element type.
    const LAYOUT: PageLayout = PageLayout::for_element::<Self>();
}

impl HugeElement for i64 {}
impl HugeElement for f64 {}
impl HugeElement for u8 {}

/// Huge array of `i64`.
pub type HugeLongArray = HugeArray<i64>;
/// Huge array of `f64`.
pub type HugeDoubleArray = HugeArray<f64>;
/// Huge array of `u8`.
pub type HugeByteArray = HugeArray<u8>;

/// Fixed-size array of `T` that may exceed a single allocation.
#[derive(Clone)]
pub struct HugeArray<T: HugeElement> {
    size: usize,
    storage: Storage<T>,
}

impl<T: HugeElement> HugeArray<T> {
    /// Zeroed array, single layout when `size` fits one allocation.
    pub fn new(size: usize) -> Self {
        if size <= MAX_ARRAY_LENGTH {
            Self::new_single(size)
        } else {
            Self::new_paged(size)
        }
    }

    /// Zeroed array in one allocation.
    pub fn new_single(size: usize) -> Self {
        Self {
            size,
            storage: Storage::single_with(size, |_| T::default()),
        }
    }

    /// Zeroed array split into pages.
    pub fn new_paged(size: usize) -> Self {
        Self {
            size,
            storage: Storage::paged_with(size, T::LAYOUT, |_| T::default()),
        }
    }

    /// Array filled by `creator`, single layout when `size` fits one
    /// allocation. Both layouts fill page-sized chunks with the creator's
    /// concurrency.
    pub fn with_creator(size: usize, creator: &PageCreator<T>) -> Self {
        if size > MAX_ARRAY_LENGTH {
            return Self::paged_with_creator(size, creator);
        }
        let mut values = vec![T::default(); size].into_boxed_slice();
        let page_size = T::LAYOUT.page_size();
        let mut chunks: Vec<(usize, &mut [T])> = values
            .chunks_mut(page_size)
            .enumerate()
            .map(|(page, chunk)| (page * page_size, chunk))
            .collect();
        for_each_parallel(creator.concurrency(), &mut chunks, |_, (base, chunk)| {
            creator.fill_page(&mut **chunk, *base, |v| v)
        });
        Self {
            size,
            storage: Storage::Single(values),
        }
    }

    /// Paged array whose pages are allocated and filled by `creator`.
    pub fn paged_with_creator(size: usize, creator: &PageCreator<T>) -> Self {
        let pages = creator.create_pages(size, T::LAYOUT, |v| v);
        Self {
            size,
            storage: Storage::from_pages(pages, T::LAYOUT),
        }
    }

    /// Array holding a copy of `values`.
    pub fn from_slice(values: &[T]) -> Self {
        let mut array = Self::new(values.len());
        array.copy_from_slice(0, values);
        array
    }

    pub(crate) fn from_pages(pages: Vec<Box<[T]>>, size: usize) -> Self {
        let mut pages = pages;
        let layout = T::LAYOUT;
        pages.truncate(layout.num_pages_for(size));
        if let Some(last) = pages.last_mut() {
            let keep = layout.last_page_size(size);
            if last.len() > keep {
                *last = last[..keep].into();
            }
        }
        Self {
            size,
            storage: Storage::from_pages(pages, layout),
        }
    }

    /// Number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the array has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the paged layout backs this array.
    pub fn is_paged(&self) -> bool {
        self.storage.is_paged()
    }

    /// Element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= size`.
    #[inline]
    #[track_caller]
    pub fn get(&self, index: usize) -> T {
        check_index(index, self.size);
        *self.storage.get(index)
    }

    /// Overwrites the element at `index`.
    #[inline]
    #[track_caller]
    pub fn set(&mut self, index: usize, value: T) {
        check_index(index, self.size);
        *self.storage.get_mut(index) = value;
    }

    /// Applies `update` to the element at `index`, returning the previous value.
    #[inline]
    #[track_caller]
    pub fn update(&mut self, index: usize, update: impl FnOnce(T) -> T) -> T {
        check_index(index, self.size);
        let slot = self.storage.get_mut(index);
        let previous = *slot;
        *slot = update(previous);
        previous
    }

    /// Sets every element to `value`.
    pub fn fill(&mut self, value: T) {
        for (_, chunk) in self.storage.chunks_mut() {
            chunk.fill(value);
        }
    }

    /// Sets every element to `generator(index)`.
    pub fn set_all(&mut self, generator: impl Fn(usize) -> T + Sync + Send) {
        self.set_all_parallel(Concurrency::SEQUENTIAL, generator);
    }

    /// Sets every element to `generator(index)`, filling pages in parallel.
    pub fn set_all_parallel(
        &mut self,
        concurrency: Concurrency,
        generator: impl Fn(usize) -> T + Sync + Send,
    ) {
        let mut chunks = self.storage.chunks_mut();
        for_each_parallel(concurrency, &mut chunks, |_, (base, chunk)| {
            for (offset, slot) in chunk.iter_mut().enumerate() {
                *slot = generator(*base + offset);
            }
        });
    }

    /// Copies `values` into `[start, start + values.len())`.
    #[track_caller]
    pub fn copy_from_slice(&mut self, start: usize, values: &[T]) {
        if values.is_empty() {
            return;
        }
        check_index(start + values.len() - 1, self.size);
        let mut written = 0;
        for (base, chunk) in self.storage.chunks_mut() {
            let chunk_end = base + chunk.len();
            let from = start + written;
            if written == values.len() {
                break;
            }
            if from >= chunk_end {
                continue;
            }
            let offset = from - base;
            let take = (chunk.len() - offset).min(values.len() - written);
            chunk[offset..offset + take].copy_from_slice(&values[written..written + take]);
            written += take;
        }
    }

    /// Copies the first `length` elements into `dest`, resetting the rest of
    /// `dest` to the default value.
    ///
    /// # Panics
    ///
    /// Panics if `length` exceeds either array's size.
    #[track_caller]
    pub fn copy_to(&self, dest: &mut HugeArray<T>, length: usize) {
        assert!(
            length <= self.size && length <= dest.size,
            "copy length {length} exceeds source {} or destination {}",
            self.size,
            dest.size
        );
        let mut copied = 0;
        for (_, chunk) in self.storage.chunks() {
            if copied == length {
                break;
            }
            let take = chunk.len().min(length - copied);
            dest.copy_from_slice(copied, &chunk[..take]);
            copied += take;
        }
        for index in length..dest.size {
            *dest.storage.get_mut(index) = T::default();
        }
    }

    /// New array of `new_size` elements holding a prefix copy of this one.
    pub fn copy_of(&self, new_size: usize) -> Self {
        let mut copy = Self::new(new_size);
        self.copy_to(&mut copy, self.size.min(new_size));
        copy
    }

    /// Elements as a `Vec`.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.size);
        for (_, chunk) in self.storage.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Pages in index order with the global index of their first element.
    pub fn pages(&self) -> impl Iterator<Item = (usize, &[T])> + '_ {
        self.storage.chunks()
    }

    /// Iterator over all elements.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.storage.chunks().flat_map(|(_, chunk)| chunk.iter().copied())
    }

    /// Mutable range view over all elements.
    pub fn as_slice_mut(&mut self) -> HugeSliceMut<'_, T> {
        self.storage.slice_mut(self.size)
    }

    /// Bytes currently held by the element storage.
    pub fn size_of(&self) -> usize {
        self.storage.size_in_bytes()
    }

    /// Frees the element storage and returns the number of bytes released.
    /// Releasing twice returns 0.
    pub fn release(&mut self) -> usize {
        let freed = self.storage.size_in_bytes();
        self.storage = Storage::empty();
        self.size = 0;
        trace!(freed, "huge_array.release");
        freed
    }

    /// Bytes needed for an array of `size` elements.
    ///
    /// Depends only on `size`: forcing a layout never changes the estimate.
    pub fn memory_estimation(size: usize) -> usize {
        let fixed = size_of::<Self>();
        if size <= MAX_ARRAY_LENGTH {
            fixed + estimate::size_of_array::<T>(size)
        } else {
            fixed + estimate::size_of_paged::<T>(size, T::LAYOUT.shift())
        }
    }
}

impl HugeArray<i64> {
    /// Bitwise-or `value` into the element at `index`.
    #[track_caller]
    pub fn or(&mut self, index: usize, value: i64) {
        self.update(index, |v| v | value);
    }

    /// Bitwise-and `value` into the element at `index`, returning the result.
    #[track_caller]
    pub fn and(&mut self, index: usize, value: i64) -> i64 {
        self.update(index, |v| v & value) & value
    }

    /// Adds `delta` to the element at `index`.
    #[track_caller]
    pub fn add_to(&mut self, index: usize, delta: i64) {
        self.update(index, |v| v.wrapping_add(delta));
    }

    /// Adds `delta` to the element at `index`, returning the previous value.
    #[track_caller]
    pub fn get_and_add(&mut self, index: usize, delta: i64) -> i64 {
        self.update(index, |v| v.wrapping_add(delta))
    }

    /// Binary search over ascending content.
    ///
    /// Returns the last index whose value is `<= target`, or `-1` when every
    /// value is larger than `target`.
    pub fn binary_search(&self, target: i64) -> i64 {
        let mut low = 0usize;
        let mut high = self.size;
        while low < high {
            let mid = low + (high - low) / 2;
            if *self.storage.get(mid) <= target {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low as i64 - 1
    }
}

impl HugeArray<f64> {
    /// Adds `delta` to the element at `index`.
    #[track_caller]
    pub fn add_to(&mut self, index: usize, delta: f64) {
        self.update(index, |v| v + delta);
    }

    /// Adds `delta` to the element at `index`, returning the previous value.
    #[track_caller]
    pub fn get_and_add(&mut self, index: usize, delta: f64) -> f64 {
        self.update(index, |v| v + delta)
    }
}

impl HugeArray<u8> {
    /// Bitwise-or `value` into the byte at `index`.
    #[track_caller]
    pub fn or(&mut self, index: usize, value: u8) {
        self.update(index, |v| v | value);
    }

    /// Bitwise-and `value` into the byte at `index`, returning the result.
    #[track_caller]
    pub fn and(&mut self, index: usize, value: u8) -> u8 {
        self.update(index, |v| v & value) & value
    }

    /// Wrapping add of `delta` to the byte at `index`.
    #[track_caller]
    pub fn add_to(&mut self, index: usize, delta: u8) {
        self.update(index, |v| v.wrapping_add(delta));
    }

    /// Wrapping add of `delta`, returning the previous byte.
    #[track_caller]
    pub fn get_and_add(&mut self, index: usize, delta: u8) -> u8 {
        self.update(index, |v| v.wrapping_add(delta))
    }
}

impl<T: HugeElement> fmt::Debug for HugeArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HugeArray")
            .field("size", &self.size)
            .field("paged", &self.is_paged())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread::{self, ThreadId};
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    fn both_layouts(size: usize) -> [HugeLongArray; 2] {
        [HugeLongArray::new_single(size), HugeLongArray::new_paged(size)]
    }

    #[test]
    fn get_returns_what_set_wrote() {
        for mut array in both_layouts(10_000) {
            assert_eq!(array.get(9_999), 0);
            array.set(4_097, 42);
            array.set(0, -1);
            assert_eq!(array.get(4_097), 42);
            assert_eq!(array.get(0), -1);
        }
    }

    #[test]
    #[should_panic(expected = "index 10 out of bounds for length 10")]
    fn single_get_past_end_panics() {
        HugeLongArray::new_single(10).get(10);
    }

    #[test]
    #[should_panic(expected = "index 10 out of bounds for length 10")]
    fn paged_set_past_end_panics() {
        HugeLongArray::new_paged(10).set(10, 1);
    }

    #[test]
    fn arithmetic_updates() {
        for mut array in both_layouts(5_000) {
            array.or(4_500, 0b0101);
            array.or(4_500, 0b0010);
            assert_eq!(array.get(4_500), 0b0111);
            assert_eq!(array.and(4_500, 0b0110), 0b0110);
            array.add_to(3, 5);
            assert_eq!(array.get_and_add(3, 2), 5);
            assert_eq!(array.get(3), 7);
        }
        let mut bytes = HugeByteArray::new_paged(40_000);
        bytes.add_to(33_000, 255);
        bytes.add_to(33_000, 2);
        assert_eq!(bytes.get(33_000), 1);
        let mut doubles = HugeDoubleArray::new(3);
        doubles.add_to(1, 0.5);
        doubles.add_to(1, 0.25);
        assert_eq!(doubles.get(1), 0.75);
        assert_eq!(doubles.get_and_add(1, 1.0), 0.75);
        assert_eq!(doubles.get(1), 1.75);
    }

    #[test]
    fn set_all_uses_global_index() {
        for mut array in both_layouts(9_000) {
            array.set_all_parallel(Concurrency::new(4), |i| i as i64 * 2);
            assert_eq!(array.get(8_999), 17_998);
            assert_eq!(array.get(4_096), 8_192);
        }
    }

    #[test]
    fn creator_fills_single_and_paged() {
        let creator = PageCreator::generator(|i| i as i64 + 1);
        let single = HugeLongArray::with_creator(100, &creator);
        let paged = HugeLongArray::paged_with_creator(10_000, &creator);
        assert!(!single.is_paged());
        assert!(paged.is_paged());
        assert_eq!(single.get(99), 100);
        assert_eq!(paged.get(9_999), 10_000);
    }

    /// Generator that records the filling threads. The first element of each
    /// page waits until a second thread shows up, so a fill that never leaves
    /// one thread times out instead of passing.
    fn thread_recording_creator(
        seen: Arc<Mutex<HashSet<ThreadId>>>,
    ) -> PageCreator<i64> {
        let page_size = <i64 as HugeElement>::LAYOUT.page_size();
        PageCreator::generator(move |i| {
            if i % page_size == 0 {
                seen.lock().insert(thread::current().id());
                let deadline = Instant::now() + Duration::from_secs(10);
                while seen.lock().len() < 2 && Instant::now() < deadline {
                    thread::yield_now();
                }
            }
            i as i64 * 5
        })
        .parallel(Concurrency::new(4))
    }

    #[test]
    fn parallel_creator_uses_workers_in_both_layouts() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let size = 4 * <i64 as HugeElement>::LAYOUT.page_size();
        let expected: Vec<i64> = (0..size as i64).map(|i| i * 5).collect();
        for paged in [false, true] {
            let seen = Arc::new(Mutex::new(HashSet::new()));
            let creator = thread_recording_creator(Arc::clone(&seen));
            let array = pool.install(|| {
                if paged {
                    HugeLongArray::paged_with_creator(size, &creator)
                } else {
                    HugeLongArray::with_creator(size, &creator)
                }
            });
            assert_eq!(array.is_paged(), paged);
            assert_eq!(array.to_vec(), expected);
            assert!(seen.lock().len() >= 2, "paged={paged} filled on one thread");
        }
    }

    #[test]
    fn binary_search_finds_last_not_greater() {
        for mut array in both_layouts(10_000) {
            array.set_all(|i| (i as i64) * 10 + 5);
            assert_eq!(array.binary_search(4), -1);
            assert_eq!(array.binary_search(5), 0);
            assert_eq!(array.binary_search(14), 0);
            assert_eq!(array.binary_search(15), 1);
            assert_eq!(array.binary_search(i64::MAX), 9_999);
        }
        assert_eq!(HugeLongArray::new(0).binary_search(3), -1);
    }

    #[test]
    fn copy_to_resets_tail() {
        let source = HugeLongArray::from_slice(&[1, 2, 3]);
        let mut dest = HugeLongArray::new_paged(5);
        dest.fill(9);
        source.copy_to(&mut dest, 3);
        assert_eq!(dest.to_vec(), vec![1, 2, 3, 0, 0]);
        assert_eq!(source.copy_of(2).to_vec(), vec![1, 2]);
        assert_eq!(source.copy_of(4).to_vec(), vec![1, 2, 3, 0]);
    }

    #[test]
    fn copy_from_slice_crosses_pages() {
        let mut array = HugeLongArray::new_paged(10_000);
        let values: Vec<i64> = (0..200).collect();
        array.copy_from_slice(4_000, &values);
        assert_eq!(array.get(4_000), 0);
        assert_eq!(array.get(4_096), 96);
        assert_eq!(array.get(4_199), 199);
    }

    #[test]
    fn release_reports_freed_bytes_once() {
        let mut array = HugeLongArray::new_paged(10_000);
        let freed = array.release();
        assert!(freed >= 10_000 * 8);
        assert_eq!(array.release(), 0);
        assert_eq!(array.size(), 0);
    }

    #[test]
    fn memory_estimation_is_monotonic() {
        let mut last = 0;
        for size in [0usize, 1, 10, 4_096, 1 << 20, MAX_ARRAY_LENGTH, MAX_ARRAY_LENGTH + 1] {
            let bytes = HugeLongArray::memory_estimation(size);
            assert!(bytes >= last, "estimation decreased at {size}");
            last = bytes;
        }
        assert_eq!(
            HugeLongArray::memory_estimation(100),
            size_of::<HugeLongArray>() + 800
        );
    }

    #[test]
    fn pages_report_their_base_index() {
        let array = HugeLongArray::new_paged(9_000);
        let bases: Vec<usize> = array.pages().map(|(base, _)| base).collect();
        assert_eq!(bases, vec![0, 4_096, 8_192]);
        assert_eq!(array.iter().count(), 9_000);
    }
}
