//! Page-sparse long array: only pages that received a write are allocated.

use std::mem::size_of;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::debug;

use crate::primitives::concurrency::SegmentedDirectory;
use crate::primitives::paging::{estimate, MemoryRange, PageLayout};

const LAYOUT: PageLayout = PageLayout::with_shift(12);

/// Read-only sparse array; untouched indices read as the default value.
#[derive(Clone, Debug)]
pub struct HugeSparseLongArray {
    default_value: i64,
    capacity: usize,
    pages: Vec<Option<Box<[i64]>>>,
}

impl HugeSparseLongArray {
    /// Concurrent builder whose untouched indices read as `default_value`.
    pub fn builder(default_value: i64) -> GrowingBuilder {
        GrowingBuilder::create(default_value)
    }

    /// Value at `index`, or the default when never written.
    #[inline]
    pub fn get(&self, index: usize) -> i64 {
        match self.pages.get(LAYOUT.page_index(index)) {
            Some(Some(page)) => page[LAYOUT.index_in_page(index)],
            _ => self.default_value,
        }
    }

    /// Whether `index` holds a value other than the default.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.get(index) != self.default_value
    }

    /// Value returned for untouched indices.
    pub fn default_value(&self) -> i64 {
        self.default_value
    }

    /// Addressable indices, rounded up to whole pages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of allocated pages.
    pub fn allocated_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }

    /// Bytes for an array addressing ids up to `max_id` that holds
    /// `max_entries` values. The best case packs the entries into as few pages
    /// as possible; the worst case touches a separate page per entry.
    pub fn memory_estimation(max_id: usize, max_entries: usize) -> MemoryRange {
        let directory_pages = LAYOUT.num_pages_for(max_id.saturating_add(1));
        let directory = size_of::<Self>()
            + estimate::size_of_page_directory::<Option<Box<[i64]>>>(directory_pages);
        let page_bytes = estimate::size_of_array::<i64>(LAYOUT.page_size());
        let min_pages = LAYOUT.num_pages_for(max_entries).min(directory_pages);
        let max_pages = max_entries.min(directory_pages);
        MemoryRange::of(directory).add(MemoryRange::between(min_pages, max_pages).times(page_bytes))
    }
}

/// Thread-safe builder for [`HugeSparseLongArray`].
///
/// Pages are published lazily with compare-and-swap; a writer that loses the
/// race uses the winner's page.
pub struct GrowingBuilder {
    default_value: i64,
    pages: SegmentedDirectory<Box<[AtomicI64]>>,
}

impl GrowingBuilder {
    /// Empty builder with the given default value.
    pub fn create(default_value: i64) -> Self {
        Self {
            default_value,
            pages: SegmentedDirectory::new(),
        }
    }

    fn page(&self, index: usize) -> &[AtomicI64] {
        let default_value = self.default_value;
        self.pages.get_or_install(LAYOUT.page_index(index), || {
            (0..LAYOUT.page_size())
                .map(|_| AtomicI64::new(default_value))
                .collect()
        })
    }

    #[inline]
    fn cell(&self, index: usize) -> &AtomicI64 {
        &self.page(index)[LAYOUT.index_in_page(index)]
    }

    /// Stores `value` at `index`.
    pub fn set(&self, index: usize, value: i64) {
        self.cell(index).store(value, Ordering::Release);
    }

    /// Stores `value` when `index` still holds the default. Returns whether
    /// the value was stored.
    pub fn set_if_absent(&self, index: usize, value: i64) -> bool {
        self.cell(index)
            .compare_exchange(self.default_value, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Adds `delta` to the value at `index`, starting from the default.
    pub fn add_to(&self, index: usize, delta: i64) {
        self.cell(index).fetch_add(delta, Ordering::AcqRel);
    }

    /// Number of pages allocated so far.
    pub fn allocated_pages(&self) -> usize {
        self.pages.iter().count()
    }

    /// Freezes the written pages. Call after all writers have finished.
    pub fn build(self) -> HugeSparseLongArray {
        let written = self.pages.into_values();
        let page_count = written.last().map_or(0, |(page, _)| page + 1);
        let mut pages: Vec<Option<Box<[i64]>>> = vec![None; page_count];
        let allocated = written.len();
        for (index, page) in written {
            pages[index] = Some(page.iter().map(|cell| cell.load(Ordering::Acquire)).collect());
        }
        debug!(pages = page_count, allocated, "sparse_array.build");
        HugeSparseLongArray {
            default_value: self.default_value,
            capacity: page_count << LAYOUT.shift(),
            pages,
        }
    }
}
