#![allow(unsafe_code)]
//! Concurrency building blocks for the huge collections.
//!
//! - [`Concurrency`]: bounded worker count handed to every parallel entry point.
//! - [`AtomicSlot`]: a write-once page handle published with compare-and-swap.
//! - [`SegmentedDirectory`]: an append-only, lock-free directory of slots.
//! - [`GrowingDirectory`]: a page directory grown by reallocation under a
//!   mutex while readers keep using the previous snapshot without locking.

use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

/// Number of workers a parallel operation may use.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Concurrency(NonZeroUsize);

impl Concurrency {
    /// Single worker; every operation runs on the calling thread.
    pub const SEQUENTIAL: Concurrency = Concurrency(NonZeroUsize::MIN);

    /// Concurrency of `workers`, clamped to at least one.
    pub fn new(workers: usize) -> Self {
        Self(NonZeroUsize::new(workers).unwrap_or(NonZeroUsize::MIN))
    }

    /// Concurrency matching the available hardware parallelism.
    pub fn available() -> Self {
        Self(std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN))
    }

    /// Worker count.
    #[inline]
    pub fn value(self) -> usize {
        self.0.get()
    }

    /// Whether only one worker is allowed.
    #[inline]
    pub fn is_sequential(self) -> bool {
        self.0.get() == 1
    }

    /// Minimum items per task so that `len` items form at most `value()` tasks.
    #[inline]
    pub fn min_len_for(self, len: usize) -> usize {
        len.div_ceil(self.value()).max(1)
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::SEQUENTIAL
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs `task` for every item, spreading at most `concurrency` tasks over the
/// rayon pool. Sequential concurrency stays on the calling thread.
pub fn for_each_parallel<I, F>(concurrency: Concurrency, items: &mut [I], task: F)
where
    I: Send,
    F: Fn(usize, &mut I) + Sync + Send,
{
    if concurrency.is_sequential() || items.len() < 2 {
        for (index, item) in items.iter_mut().enumerate() {
            task(index, item);
        }
        return;
    }
    let min_len = concurrency.min_len_for(items.len());
    items
        .par_iter_mut()
        .with_min_len(min_len)
        .enumerate()
        .for_each(|(index, item)| task(index, item));
}

/// Write-once slot holding an optional boxed value.
///
/// Installing a value is a single compare-and-swap on the slot pointer. A
/// thread that loses the race drops its candidate and uses the winner's value.
pub struct AtomicSlot<T> {
    ptr: AtomicPtr<T>,
    _owns: PhantomData<*mut T>,
}

// SAFETY: the slot owns its boxed value. Moving the slot moves the box.
unsafe impl<T: Send> Send for AtomicSlot<T> {}
// SAFETY: shared access hands out `&T` (needs `Sync`) and may install or drop
// a `T` created on another thread (needs `Send`).
unsafe impl<T: Send + Sync> Sync for AtomicSlot<T> {}

impl<T> AtomicSlot<T> {
    /// Empty slot.
    pub const fn empty() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    /// Installed value, if any.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        let current = self.ptr.load(Ordering::Acquire);
        // SAFETY: a non-null pointer was produced by `Box::into_raw` and is only
        // freed through `&mut self`, so it outlives this shared borrow.
        unsafe { current.as_ref() }
    }

    /// Installed value, creating and publishing one if the slot is empty.
    pub fn get_or_install(&self, create: impl FnOnce() -> T) -> &T {
        if let Some(existing) = self.get() {
            return existing;
        }
        let candidate = Box::into_raw(Box::new(create()));
        match self.ptr.compare_exchange(
            ptr::null_mut(),
            candidate,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // SAFETY: we just published `candidate`; it stays alive with the slot.
            Ok(_) => unsafe { &*candidate },
            Err(winner) => {
                // SAFETY: `candidate` was never published, so we still own it.
                drop(unsafe { Box::from_raw(candidate) });
                // SAFETY: `winner` is non-null and owned by the slot.
                unsafe { &*winner }
            }
        }
    }

    /// Whether a value is installed.
    #[inline]
    pub fn is_installed(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }

    /// Removes and returns the installed value.
    pub fn take(&mut self) -> Option<T> {
        let current = std::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        if current.is_null() {
            None
        } else {
            // SAFETY: exclusive access; the pointer came from `Box::into_raw`.
            Some(*unsafe { Box::from_raw(current) })
        }
    }

    /// Mutable access to the installed value.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: exclusive access to an owned box.
        unsafe { self.ptr.get_mut().as_mut() }
    }
}

impl<T> Default for AtomicSlot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Drop for AtomicSlot<T> {
    fn drop(&mut self) {
        drop(self.take());
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicSlot").field(&self.get()).finish()
    }
}

const FIRST_SEGMENT_SLOTS: usize = 16;
const SEGMENTS: usize = 48;

/// Append-only directory of [`AtomicSlot`]s that never relocates a slot.
///
/// Segment `s` holds `16 << s` slots and is itself published through an
/// `AtomicSlot`, so extending the directory never blocks readers of existing
/// slots and never takes a lock.
pub struct SegmentedDirectory<T> {
    segments: [AtomicSlot<Box<[AtomicSlot<T>]>>; SEGMENTS],
}

impl<T> SegmentedDirectory<T> {
    /// Empty directory.
    pub fn new() -> Self {
        Self {
            segments: std::array::from_fn(|_| AtomicSlot::empty()),
        }
    }

    #[inline]
    fn locate(index: usize) -> (usize, usize) {
        let scaled = index / FIRST_SEGMENT_SLOTS + 1;
        let segment = (usize::BITS - 1 - scaled.leading_zeros()) as usize;
        let start = FIRST_SEGMENT_SLOTS * ((1usize << segment) - 1);
        (segment, index - start)
    }

    /// Slot `index` if its segment has been published.
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&AtomicSlot<T>> {
        let (segment, offset) = Self::locate(index);
        self.segments[segment].get().map(|slots| &slots[offset])
    }

    /// Value at `index`, if installed.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slot(index).and_then(AtomicSlot::get)
    }

    /// Slot `index`, publishing its segment if needed.
    pub fn slot_or_extend(&self, index: usize) -> &AtomicSlot<T> {
        let (segment, offset) = Self::locate(index);
        let slots = self.segments[segment].get_or_install(|| {
            tracing::trace!(segment, slots = FIRST_SEGMENT_SLOTS << segment, "directory.extend");
            (0..FIRST_SEGMENT_SLOTS << segment)
                .map(|_| AtomicSlot::empty())
                .collect()
        });
        &slots[offset]
    }

    /// Value at `index`, creating it with `create` if absent.
    pub fn get_or_install(&self, index: usize, create: impl FnOnce() -> T) -> &T {
        self.slot_or_extend(index).get_or_install(create)
    }

    /// Number of slot positions covered by published segments.
    pub fn published_slots(&self) -> usize {
        self.segments
            .iter()
            .enumerate()
            .take_while(|(_, segment)| segment.is_installed())
            .map(|(segment, _)| FIRST_SEGMENT_SLOTS << segment)
            .sum()
    }

    /// Installed values with their slot index, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        let mut start = 0;
        self.segments
            .iter()
            .enumerate()
            .filter_map(move |(segment, slots)| {
                let base = start;
                start += FIRST_SEGMENT_SLOTS << segment;
                slots.get().map(|slots| (base, slots))
            })
            .flat_map(|(base, slots)| {
                slots
                    .iter()
                    .enumerate()
                    .filter_map(move |(offset, slot)| slot.get().map(|v| (base + offset, v)))
            })
    }

    /// Consumes the directory, yielding installed values with their index.
    pub fn into_values(mut self) -> Vec<(usize, T)> {
        let mut out = Vec::new();
        let mut start = 0;
        for (segment, slots) in self.segments.iter_mut().enumerate() {
            if let Some(slots) = slots.get_mut() {
                for (offset, slot) in slots.iter_mut().enumerate() {
                    if let Some(value) = slot.take() {
                        out.push((start + offset, value));
                    }
                }
            }
            start += FIRST_SEGMENT_SLOTS << segment;
        }
        out
    }
}

impl<T> Default for SegmentedDirectory<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Page directory grown by reallocation inside a short exclusive section.
///
/// Readers load the current page list without locking. Growth copies the page
/// handles into a larger list, publishes it, and retires the previous list
/// instead of freeing it, so a reader still holding the old list keeps valid
/// pages. Pages are shared between lists, so writes through either are visible.
///
/// Retired lists live until the directory is dropped or consumed by
/// [`into_pages`](Self::into_pages). Each growth step enlarges the list by at
/// least half, so the number of retired lists is logarithmic in the page
/// count and their handles add up to roughly twice the live list.
pub struct GrowingDirectory<P: ?Sized> {
    current: AtomicPtr<Vec<Arc<P>>>,
    retired: Mutex<Vec<Box<Vec<Arc<P>>>>>,
}

// SAFETY: the directory owns its lists; page handles are `Arc<P>`.
unsafe impl<P: ?Sized + Send + Sync> Send for GrowingDirectory<P> {}
// SAFETY: shared access only hands out `&[Arc<P>]` and appends under a mutex.
unsafe impl<P: ?Sized + Send + Sync> Sync for GrowingDirectory<P> {}

impl<P: ?Sized> GrowingDirectory<P> {
    /// Directory starting with `pages`.
    pub fn new(pages: Vec<Arc<P>>) -> Self {
        Self {
            current: AtomicPtr::new(Box::into_raw(Box::new(pages))),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Current page list.
    #[inline]
    pub fn pages(&self) -> &[Arc<P>] {
        // SAFETY: the pointer is never null while `self` is alive, and lists are
        // only freed through `&mut self` or on drop.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// Number of pages in the current list.
    #[inline]
    pub fn len(&self) -> usize {
        self.pages().len()
    }

    /// Whether no page exists.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ensures at least `min_pages` pages exist, creating new ones with
    /// `create(page_index)`. Only one thread grows at a time; callers that
    /// find the directory already large enough return without allocating.
    pub fn grow_to(&self, min_pages: usize, mut create: impl FnMut(usize) -> Arc<P>) -> &[Arc<P>] {
        if self.len() >= min_pages {
            return self.pages();
        }
        let mut retired = self.retired.lock();
        let old = self.current.load(Ordering::Acquire);
        // SAFETY: valid list, see `pages`.
        let old_pages = unsafe { &*old };
        if old_pages.len() >= min_pages {
            return self.pages();
        }
        let target = min_pages.max(old_pages.len() + old_pages.len() / 2);
        let mut next = Vec::with_capacity(target);
        next.extend(old_pages.iter().cloned());
        for page in old_pages.len()..target {
            next.push(create(page));
        }
        tracing::debug!(from = old_pages.len(), to = target, "directory.grow");
        self.current
            .store(Box::into_raw(Box::new(next)), Ordering::Release);
        // SAFETY: `old` came from `Box::into_raw` and is no longer current.
        retired.push(unsafe { Box::from_raw(old) });
        self.pages()
    }

    #[cfg(test)]
    fn retired_handles(&self) -> (usize, usize) {
        let retired = self.retired.lock();
        (retired.len(), retired.iter().map(|list| list.len()).sum())
    }

    /// Consumes the directory, returning the current page list.
    pub fn into_pages(mut self) -> Vec<Arc<P>> {
        self.retired.get_mut().clear();
        let current = std::mem::replace(self.current.get_mut(), ptr::null_mut());
        // SAFETY: exclusive access; `current` is the live list.
        *unsafe { Box::from_raw(current) }
    }
}

impl<P: ?Sized> Drop for GrowingDirectory<P> {
    fn drop(&mut self) {
        let current = std::mem::replace(self.current.get_mut(), ptr::null_mut());
        if !current.is_null() {
            // SAFETY: exclusive access; the list is owned by the directory.
            drop(unsafe { Box::from_raw(current) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn concurrency_clamps_to_one() {
        assert_eq!(Concurrency::new(0).value(), 1);
        assert!(Concurrency::new(0).is_sequential());
        assert_eq!(Concurrency::new(4).min_len_for(10), 3);
    }

    #[test]
    fn slot_race_installs_exactly_one_value() {
        let slot = Arc::new(AtomicSlot::<usize>::empty());
        let created = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|id| {
                let slot = Arc::clone(&slot);
                let created = Arc::clone(&created);
                thread::spawn(move || {
                    *slot.get_or_install(|| {
                        created.fetch_add(1, Ordering::Relaxed);
                        id
                    })
                })
            })
            .collect();
        let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winner = *slot.get().unwrap();
        assert!(seen.iter().all(|&v| v == winner));
        assert!(created.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn segmented_directory_maps_indices_into_segments() {
        assert_eq!(SegmentedDirectory::<u8>::locate(0), (0, 0));
        assert_eq!(SegmentedDirectory::<u8>::locate(15), (0, 15));
        assert_eq!(SegmentedDirectory::<u8>::locate(16), (1, 0));
        assert_eq!(SegmentedDirectory::<u8>::locate(47), (1, 31));
        assert_eq!(SegmentedDirectory::<u8>::locate(48), (2, 0));
    }

    #[test]
    fn segmented_directory_is_lazy() {
        let dir = SegmentedDirectory::<u64>::new();
        assert!(dir.get(100).is_none());
        assert_eq!(dir.published_slots(), 0);
        assert_eq!(*dir.get_or_install(3, || 7), 7);
        assert_eq!(*dir.get_or_install(3, || 9), 7);
        assert_eq!(dir.published_slots(), 16);
        dir.get_or_install(100, || 1);
        let installed: Vec<_> = dir.iter().map(|(i, v)| (i, *v)).collect();
        assert_eq!(installed, vec![(3, 7), (100, 1)]);
        assert_eq!(dir.into_values(), vec![(3, 7), (100, 1)]);
    }

    #[test]
    fn growing_directory_retires_logarithmically_many_lists() {
        let dir = GrowingDirectory::<[u8]>::new(Vec::new());
        for pages in 1..=1_000 {
            dir.grow_to(pages, |_| Arc::from(vec![0u8; 1]));
        }
        let live = dir.len();
        assert!(live >= 1_000);
        let (lists, handles) = dir.retired_handles();
        assert_eq!(lists, 18);
        assert!(handles <= 3 * live, "{handles} retired handles for {live} pages");
        assert_eq!(dir.into_pages().len(), live);
    }

    #[test]
    fn growing_directory_keeps_old_snapshots_valid() {
        let dir = GrowingDirectory::<[u32]>::new(vec![Arc::from(vec![1u32; 4])]);
        let before = dir.pages();
        dir.grow_to(5, |page| Arc::from(vec![page as u32; 4]));
        assert_eq!(before.len(), 1);
        assert_eq!(before[0][0], 1);
        assert_eq!(dir.len(), 5);
        assert!(Arc::ptr_eq(&before[0], &dir.pages()[0]));
        assert_eq!(dir.pages()[4][0], 4);
        let pages = dir.into_pages();
        assert_eq!(Arc::strong_count(&pages[0]), 1);
    }

    #[test]
    fn for_each_parallel_visits_every_item() {
        let mut items = vec![0usize; 100];
        for_each_parallel(Concurrency::new(4), &mut items, |index, item| *item = index * 2);
        assert!(items.iter().enumerate().all(|(i, &v)| v == i * 2));
    }
}
