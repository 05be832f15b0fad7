//! Huge arrays whose elements support atomic read-modify-write.
//!
//! Pages use the same geometry as [`HugeArray`](super::HugeArray), so index
//! arithmetic and memory estimation match the plain arrays. Every mutating
//! operation takes `&self`; share the array across writers with `Arc` or a
//! scoped borrow.

use std::fmt;
use std::mem::size_of;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use tracing::trace;

use super::huge::HugeArray;
use super::storage::Storage;
use crate::primitives::concurrency::{for_each_parallel, Concurrency};
use crate::primitives::pages::PageCreator;
use crate::primitives::paging::{check_index, estimate, PageLayout, MAX_ARRAY_LENGTH};

/// Values with an atomic cell representation.
pub trait AtomicValue: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Atomic cell holding one value.
    type Atomic: Send + Sync;

    /// Page geometry shared with the plain array of the same value type.
    const LAYOUT: PageLayout = PageLayout::for_element::<Self>();

    /// New cell holding `value`.
    fn new_cell(value: Self) -> Self::Atomic;
    /// Current value of `cell`.
    fn load(cell: &Self::Atomic) -> Self;
    /// Overwrites `cell`.
    fn store(cell: &Self::Atomic, value: Self);
    /// Replaces `current` with `new` when the cell holds `current`. Returns the
    /// witnessed value in either case.
    fn compare_exchange(cell: &Self::Atomic, current: Self, new: Self) -> std::result::Result<Self, Self>;
    /// Replaces the value, returning the previous one.
    fn swap(cell: &Self::Atomic, value: Self) -> Self;
    /// Adds `delta`, returning the previous value.
    fn fetch_add(cell: &Self::Atomic, delta: Self) -> Self;
}

impl AtomicValue for i64 {
    type Atomic = AtomicI64;

    #[inline]
    fn new_cell(value: Self) -> AtomicI64 {
        AtomicI64::new(value)
    }

    #[inline]
    fn load(cell: &AtomicI64) -> Self {
        cell.load(Ordering::Acquire)
    }

    #[inline]
    fn store(cell: &AtomicI64, value: Self) {
        cell.store(value, Ordering::Release)
    }

    #[inline]
    fn compare_exchange(cell: &AtomicI64, current: Self, new: Self) -> std::result::Result<Self, Self> {
        cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    #[inline]
    fn swap(cell: &AtomicI64, value: Self) -> Self {
        cell.swap(value, Ordering::AcqRel)
    }

    #[inline]
    fn fetch_add(cell: &AtomicI64, delta: Self) -> Self {
        cell.fetch_add(delta, Ordering::AcqRel)
    }
}

/// Doubles are stored as their IEEE-754 bits; comparisons in
/// compare-and-set operate on bits, so `-0.0` and `0.0` differ and a NaN
/// matches the identical NaN payload.
impl AtomicValue for f64 {
    type Atomic = AtomicU64;

    #[inline]
    fn new_cell(value: Self) -> AtomicU64 {
        AtomicU64::new(value.to_bits())
    }

    #[inline]
    fn load(cell: &AtomicU64) -> Self {
        f64::from_bits(cell.load(Ordering::Acquire))
    }

    #[inline]
    fn store(cell: &AtomicU64, value: Self) {
        cell.store(value.to_bits(), Ordering::Release)
    }

    #[inline]
    fn compare_exchange(cell: &AtomicU64, current: Self, new: Self) -> std::result::Result<Self, Self> {
        cell.compare_exchange(
            current.to_bits(),
            new.to_bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .map(f64::from_bits)
        .map_err(f64::from_bits)
    }

    #[inline]
    fn swap(cell: &AtomicU64, value: Self) -> Self {
        f64::from_bits(cell.swap(value.to_bits(), Ordering::AcqRel))
    }

    fn fetch_add(cell: &AtomicU64, delta: Self) -> Self {
        let mut current = cell.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(previous) => return f64::from_bits(previous),
                Err(witness) => current = witness,
            }
        }
    }
}

/// Atomic huge array of `i64`.
pub type HugeAtomicLongArray = HugeAtomicArray<i64>;
/// Atomic huge array of `f64`.
pub type HugeAtomicDoubleArray = HugeAtomicArray<f64>;

/// Fixed-size array of atomic cells addressed by 64-bit indices.
pub struct HugeAtomicArray<T: AtomicValue> {
    size: usize,
    storage: Storage<T::Atomic>,
}

impl<T: AtomicValue> HugeAtomicArray<T> {
    /// Array of default values, single layout when `size` fits one allocation.
    pub fn new(size: usize) -> Self {
        if size <= MAX_ARRAY_LENGTH {
            Self::new_single(size)
        } else {
            Self::new_paged(size)
        }
    }

    /// Array in one allocation.
    pub fn new_single(size: usize) -> Self {
        Self {
            size,
            storage: Storage::single_with(size, |_| T::new_cell(T::default())),
        }
    }

    /// Array split into pages.
    pub fn new_paged(size: usize) -> Self {
        Self {
            size,
            storage: Storage::paged_with(size, T::LAYOUT, |_| T::new_cell(T::default())),
        }
    }

    /// Paged array whose pages are allocated and filled by `creator`.
    pub fn with_creator(size: usize, creator: &PageCreator<T>) -> Self {
        let pages = creator.create_pages(size, T::LAYOUT, T::new_cell);
        Self {
            size,
            storage: Storage::from_pages(pages, T::LAYOUT),
        }
    }

    /// Number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the paged layout backs this array.
    pub fn is_paged(&self) -> bool {
        self.storage.is_paged()
    }

    #[inline]
    #[track_caller]
    fn cell(&self, index: usize) -> &T::Atomic {
        check_index(index, self.size);
        self.storage.get(index)
    }

    /// Current value at `index`.
    #[inline]
    #[track_caller]
    pub fn get(&self, index: usize) -> T {
        T::load(self.cell(index))
    }

    /// Overwrites the value at `index`.
    #[inline]
    #[track_caller]
    pub fn set(&self, index: usize, value: T) {
        T::store(self.cell(index), value)
    }

    /// Stores `new` when the value at `index` equals `expected`.
    #[track_caller]
    pub fn compare_and_set(&self, index: usize, expected: T, new: T) -> bool {
        T::compare_exchange(self.cell(index), expected, new).is_ok()
    }

    /// Stores `new` when the value at `index` equals `expected`, returning the
    /// value witnessed before the attempt whether or not it succeeded.
    #[track_caller]
    pub fn compare_and_exchange(&self, index: usize, expected: T, new: T) -> T {
        match T::compare_exchange(self.cell(index), expected, new) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// Adds `delta` to the value at `index`, returning the previous value.
    #[track_caller]
    pub fn get_and_add(&self, index: usize, delta: T) -> T {
        T::fetch_add(self.cell(index), delta)
    }

    /// Replaces the value at `index`, returning the previous value.
    #[track_caller]
    pub fn get_and_replace(&self, index: usize, value: T) -> T {
        T::swap(self.cell(index), value)
    }

    /// Applies `update` to the value at `index` until a compare-and-exchange
    /// commits, returning the value that was replaced. `update` may run
    /// several times under contention.
    #[track_caller]
    pub fn update(&self, index: usize, update: impl Fn(T) -> T) -> T {
        let cell = self.cell(index);
        let mut current = T::load(cell);
        loop {
            match T::compare_exchange(cell, current, update(current)) {
                Ok(previous) => return previous,
                Err(witness) => current = witness,
            }
        }
    }

    /// Stores `value` in every element.
    pub fn set_all(&self, value: T) {
        for (_, chunk) in self.storage.chunks() {
            for cell in chunk {
                T::store(cell, value);
            }
        }
    }

    /// Stores `generator(index)` in every element, pages spread over workers.
    pub fn set_all_with(&mut self, concurrency: Concurrency, generator: impl Fn(usize) -> T + Sync + Send) {
        let mut chunks = self.storage.chunks_mut();
        for_each_parallel(concurrency, &mut chunks, |_, (base, chunk)| {
            for (offset, cell) in chunk.iter_mut().enumerate() {
                *cell = T::new_cell(generator(*base + offset));
            }
        });
    }

    /// Copies the first `length` values into `dest`, resetting the rest of
    /// `dest` to the default.
    #[track_caller]
    pub fn copy_to(&self, dest: &HugeAtomicArray<T>, length: usize) {
        assert!(
            length <= self.size && length <= dest.size,
            "copy length {length} exceeds source {} or destination {}",
            self.size,
            dest.size
        );
        for index in 0..dest.size {
            let value = if index < length {
                T::load(self.storage.get(index))
            } else {
                T::default()
            };
            T::store(dest.storage.get(index), value);
        }
    }

    /// Snapshot of the values as a plain huge array with the same layout.
    pub fn to_huge_array(&self) -> HugeArray<T>
    where
        T: super::huge::HugeElement,
    {
        let mut out = if self.is_paged() {
            HugeArray::new_paged(self.size)
        } else {
            HugeArray::new_single(self.size)
        };
        out.set_all(|index| T::load(self.storage.get(index)));
        out
    }

    /// Frees the cells and returns the number of bytes released.
    pub fn release(&mut self) -> usize {
        let freed = self.storage.size_in_bytes();
        self.storage = Storage::empty();
        self.size = 0;
        trace!(freed, "huge_atomic_array.release");
        freed
    }

    /// Bytes needed for an array of `size` elements, independent of layout.
    pub fn memory_estimation(size: usize) -> usize {
        let fixed = size_of::<Self>();
        if size <= MAX_ARRAY_LENGTH {
            fixed + estimate::size_of_array::<T::Atomic>(size)
        } else {
            fixed + estimate::size_of_paged::<T::Atomic>(size, T::LAYOUT.shift())
        }
    }
}

impl<T: AtomicValue> fmt::Debug for HugeAtomicArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HugeAtomicArray")
            .field("size", &self.size)
            .field("paged", &self.is_paged())
            .finish()
    }
}
