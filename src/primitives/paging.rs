//! Page arithmetic shared by every huge collection.
//!
//! A logical index `i` lives in page `i >> shift` at offset `i & mask`. Every
//! array family derives its page size from [`PAGE_SIZE_IN_BYTES`] so one page
//! of any element type occupies the same amount of memory.

use std::mem::size_of;

/// Target byte size of a single page.
pub const PAGE_SIZE_IN_BYTES: usize = 32 * 1024;

/// Largest element count stored in a single contiguous allocation. Bigger
/// arrays switch to the paged layout.
pub const MAX_ARRAY_LENGTH: usize = 1 << 28;

/// Page geometry for one element type.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageLayout {
    shift: u32,
}

impl PageLayout {
    /// Layout with `1 << shift` elements per page.
    pub const fn with_shift(shift: u32) -> Self {
        assert!(shift > 0 && shift < 32, "page shift out of range");
        Self { shift }
    }

    /// Layout whose pages hold [`PAGE_SIZE_IN_BYTES`] worth of `T`.
    pub const fn for_element<T>() -> Self {
        let elem = if size_of::<T>() == 0 { 1 } else { size_of::<T>() };
        let per_page = PAGE_SIZE_IN_BYTES / elem;
        assert!(per_page.is_power_of_two(), "element size must divide the page size");
        Self::with_shift(per_page.trailing_zeros())
    }

    /// Bit shift from index to page index.
    #[inline]
    pub const fn shift(self) -> u32 {
        self.shift
    }

    /// Number of elements per page.
    #[inline]
    pub const fn page_size(self) -> usize {
        1 << self.shift
    }

    /// Mask extracting the in-page offset.
    #[inline]
    pub const fn mask(self) -> usize {
        self.page_size() - 1
    }

    /// Page that holds `index`.
    #[inline]
    pub const fn page_index(self, index: usize) -> usize {
        index >> self.shift
    }

    /// Offset of `index` inside its page.
    #[inline]
    pub const fn index_in_page(self, index: usize) -> usize {
        index & self.mask()
    }

    /// Number of pages needed for `capacity` elements.
    #[inline]
    pub const fn num_pages_for(self, capacity: usize) -> usize {
        (capacity + self.mask()) >> self.shift
    }

    /// Length of the last page for `capacity` elements, or 0 when empty.
    #[inline]
    pub const fn last_page_size(self, capacity: usize) -> usize {
        if capacity == 0 {
            0
        } else {
            1 + ((capacity - 1) & self.mask())
        }
    }

    /// Global index of element `offset` of page `page`.
    #[inline]
    pub const fn global_index(self, page: usize, offset: usize) -> usize {
        (page << self.shift) + offset
    }

    /// Length of page `page` in an array of `capacity` elements.
    #[inline]
    pub const fn page_len(self, page: usize, capacity: usize) -> usize {
        if page + 1 == self.num_pages_for(capacity) {
            self.last_page_size(capacity)
        } else {
            self.page_size()
        }
    }
}

/// Panics with the shared out-of-bounds message when `index >= len`.
#[inline]
#[track_caller]
pub fn check_index(index: usize, len: usize) {
    if index >= len {
        panic!("index {index} out of bounds for length {len}");
    }
}

/// Inclusive byte range reported by estimations with best and worst cases.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemoryRange {
    /// Best-case bytes.
    pub min: usize,
    /// Worst-case bytes.
    pub max: usize,
}

impl MemoryRange {
    /// Range collapsed to a single value.
    pub const fn of(bytes: usize) -> Self {
        Self {
            min: bytes,
            max: bytes,
        }
    }

    /// Range from explicit bounds.
    pub fn between(min: usize, max: usize) -> Self {
        assert!(min <= max, "memory range min {min} exceeds max {max}");
        Self { min, max }
    }

    /// Element-wise sum of two ranges.
    pub fn add(self, other: MemoryRange) -> Self {
        Self {
            min: self.min + other.min,
            max: self.max + other.max,
        }
    }

    /// Scales both bounds by `factor`.
    pub fn times(self, factor: usize) -> Self {
        Self {
            min: self.min * factor,
            max: self.max * factor,
        }
    }
}

pub mod estimate {
    //! Pure byte-size estimators. None of them allocate.

    use std::mem::size_of;

    /// Bytes taken by a boxed slice of `len` elements of `T`.
    #[track_caller]
    pub fn size_of_array<T>(len: usize) -> usize {
        len.checked_mul(size_of::<T>())
            .unwrap_or_else(|| panic!("array of {len} elements overflows the address space"))
    }

    /// Bytes taken by a directory of `pages` page handles.
    pub fn size_of_page_directory<H>(pages: usize) -> usize {
        size_of_array::<H>(pages)
    }

    /// Bytes of `capacity` elements spread over pages of `page_size` elements,
    /// including the page directory of boxed slices.
    pub fn size_of_paged<T>(capacity: usize, page_shift: u32) -> usize {
        let layout = super::PageLayout::with_shift(page_shift);
        let pages = layout.num_pages_for(capacity);
        size_of_page_directory::<Box<[T]>>(pages) + size_of_array::<T>(capacity)
    }
}
