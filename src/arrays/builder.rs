//! Allocate-then-insert builder for huge long arrays.
//!
//! Writers reserve disjoint index ranges with [`HugeLongArrayBuilder::allocate`]
//! and copy values through the returned [`Allocator`] without further
//! synchronization. Only page creation is serialized.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use super::huge::{HugeElement, HugeLongArray};
use crate::primitives::concurrency::GrowingDirectory;
use crate::primitives::paging::PageLayout;

const LAYOUT: PageLayout = <i64 as HugeElement>::LAYOUT;

type Page = [AtomicI64];

fn new_page() -> Arc<Page> {
    (0..LAYOUT.page_size()).map(|_| AtomicI64::new(0)).collect()
}

/// Growing page store shared by concurrent writers.
pub struct HugeLongArrayBuilder {
    pages: GrowingDirectory<Page>,
}

impl HugeLongArrayBuilder {
    /// Builder with no pages allocated.
    pub fn new() -> Self {
        Self {
            pages: GrowingDirectory::new(Vec::new()),
        }
    }

    /// Builder with pages for `capacity` elements allocated up front.
    pub fn with_capacity(capacity: usize) -> Self {
        let pages = (0..LAYOUT.num_pages_for(capacity)).map(|_| new_page()).collect();
        Self {
            pages: GrowingDirectory::new(pages),
        }
    }

    /// Number of pages created so far.
    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    /// Reserves `[start, start + length)` and points `allocator` at it.
    ///
    /// Ranges passed to concurrent calls must not overlap.
    pub fn allocate(&self, start: usize, length: usize, allocator: &mut Allocator) {
        allocator.ranges.clear();
        allocator.length = length;
        if length == 0 {
            return;
        }
        let end = start + length;
        let pages = self.pages.grow_to(LAYOUT.num_pages_for(end), |_| new_page());
        let mut index = start;
        while index < end {
            let page = LAYOUT.page_index(index);
            let offset = LAYOUT.index_in_page(index);
            let take = (LAYOUT.page_size() - offset).min(end - index);
            allocator.ranges.push(Range {
                page: Arc::clone(&pages[page]),
                offset,
                len: take,
            });
            index += take;
        }
    }

    /// Freezes the first `final_size` elements into a paged array.
    ///
    /// Call after every writer has finished. Indices never reserved read as 0.
    pub fn build(self, final_size: usize) -> HugeLongArray {
        let needed = LAYOUT.num_pages_for(final_size);
        let mut shared = self.pages.into_pages();
        shared.truncate(needed);
        let allocated = shared.len();
        let mut pages: Vec<Box<[i64]>> = shared
            .into_par_iter()
            .map(|page| page.iter().map(|cell| cell.load(Ordering::Acquire)).collect())
            .collect();
        pages.resize_with(needed, || vec![0; LAYOUT.page_size()].into_boxed_slice());
        debug!(final_size, pages = needed, allocated, "array_builder.build");
        HugeLongArray::from_pages(pages, final_size)
    }
}

impl Default for HugeLongArrayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Range {
    page: Arc<Page>,
    offset: usize,
    len: usize,
}

/// Handle to one reserved range of a [`HugeLongArrayBuilder`].
///
/// Keep one allocator per writer thread and reuse it across calls.
#[derive(Default)]
pub struct Allocator {
    ranges: Vec<Range>,
    length: usize,
}

impl Allocator {
    /// Allocator with no reservation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of the current reservation.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the current reservation is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of page sub-ranges the reservation spans.
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Copies `values` into the reserved range.
    ///
    /// # Panics
    ///
    /// Panics if `values.len()` differs from the reserved length.
    #[track_caller]
    pub fn insert(&mut self, values: &[i64]) {
        assert_eq!(
            values.len(),
            self.length,
            "inserted {} values into a reservation of {}",
            values.len(),
            self.length
        );
        let mut consumed = 0;
        for range in &self.ranges {
            let cells = &range.page[range.offset..range.offset + range.len];
            for (cell, &value) in cells.iter().zip(&values[consumed..consumed + range.len]) {
                cell.store(value, Ordering::Relaxed);
            }
            consumed += range.len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_created_on_first_allocation() {
        let builder = HugeLongArrayBuilder::new();
        assert_eq!(builder.allocated_pages(), 0);
        let mut allocator = Allocator::new();
        builder.allocate(0, 10, &mut allocator);
        assert_eq!(builder.allocated_pages(), 1);
    }

    #[test]
    fn reservation_across_a_page_boundary_spans_two_ranges() {
        let builder = HugeLongArrayBuilder::new();
        let mut allocator = Allocator::new();
        builder.allocate(4_090, 10, &mut allocator);
        assert_eq!(allocator.range_count(), 2);
        allocator.insert(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let array = builder.build(4_100);
        assert_eq!(array.get(4_089), 0);
        assert_eq!(array.get(4_090), 1);
        assert_eq!(array.get(4_095), 6);
        assert_eq!(array.get(4_096), 7);
        assert_eq!(array.get(4_099), 10);
    }

    #[test]
    fn build_pads_unreserved_pages() {
        let builder = HugeLongArrayBuilder::new();
        let mut allocator = Allocator::new();
        builder.allocate(0, 2, &mut allocator);
        allocator.insert(&[5, 6]);
        let array = builder.build(10_000);
        assert_eq!(array.size(), 10_000);
        assert_eq!(array.get(1), 6);
        assert_eq!(array.get(9_999), 0);
    }

    #[test]
    #[should_panic(expected = "inserted 1 values into a reservation of 2")]
    fn insert_checks_length() {
        let builder = HugeLongArrayBuilder::with_capacity(4);
        let mut allocator = Allocator::new();
        builder.allocate(0, 2, &mut allocator);
        allocator.insert(&[1]);
    }
}
