//! Single and paged backing storage shared by all huge array flavours.

use std::mem::size_of;

use crate::primitives::paging::PageLayout;

/// Backing storage of a huge array.
///
/// `Single` keeps every element in one allocation. `Paged` splits them over
/// pages of `layout.page_size()` elements; only the last page may be shorter.
/// Callers bounds-check before indexing.
#[derive(Clone, Debug)]
pub(crate) enum Storage<T> {
    Single(Box<[T]>),
    Paged {
        pages: Vec<Box<[T]>>,
        layout: PageLayout,
    },
}

impl<T> Storage<T> {
    pub(crate) fn single_with(size: usize, mut fill: impl FnMut(usize) -> T) -> Self {
        Storage::Single((0..size).map(&mut fill).collect())
    }

    pub(crate) fn paged_with(size: usize, layout: PageLayout, mut fill: impl FnMut(usize) -> T) -> Self {
        let pages = (0..layout.num_pages_for(size))
            .map(|page| {
                let base = layout.global_index(page, 0);
                (0..layout.page_len(page, size))
                    .map(|offset| fill(base + offset))
                    .collect()
            })
            .collect();
        Storage::Paged { pages, layout }
    }

    pub(crate) fn from_pages(pages: Vec<Box<[T]>>, layout: PageLayout) -> Self {
        Storage::Paged { pages, layout }
    }

    pub(crate) fn empty() -> Self {
        Storage::Single(Box::default())
    }

    pub(crate) fn is_paged(&self) -> bool {
        matches!(self, Storage::Paged { .. })
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> &T {
        match self {
            Storage::Single(values) => &values[index],
            Storage::Paged { pages, layout } => {
                &pages[layout.page_index(index)][layout.index_in_page(index)]
            }
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, index: usize) -> &mut T {
        match self {
            Storage::Single(values) => &mut values[index],
            Storage::Paged { pages, layout } => {
                let layout = *layout;
                &mut pages[layout.page_index(index)][layout.index_in_page(index)]
            }
        }
    }

    /// Chunks in index order, each paired with the global index of its first element.
    pub(crate) fn chunks(&self) -> impl Iterator<Item = (usize, &[T])> + '_ {
        let (chunks, shift): (&[Box<[T]>], u32) = match self {
            Storage::Single(values) => (std::slice::from_ref(values), 0),
            Storage::Paged { pages, layout } => (pages.as_slice(), layout.shift()),
        };
        chunks
            .iter()
            .enumerate()
            .map(move |(i, chunk)| (if shift == 0 { 0 } else { i << shift }, &chunk[..]))
    }

    pub(crate) fn chunks_mut(&mut self) -> Vec<(usize, &mut [T])> {
        match self {
            Storage::Single(values) => vec![(0, &mut values[..])],
            Storage::Paged { pages, layout } => {
                let shift = layout.shift();
                pages
                    .iter_mut()
                    .enumerate()
                    .map(|(i, page)| (i << shift, &mut page[..]))
                    .collect()
            }
        }
    }

    /// Bytes held by the element storage and page directory.
    pub(crate) fn size_in_bytes(&self) -> usize {
        match self {
            Storage::Single(values) => values.len() * size_of::<T>(),
            Storage::Paged { pages, .. } => {
                pages.len() * size_of::<Box<[T]>>()
                    + pages.iter().map(|p| p.len() * size_of::<T>()).sum::<usize>()
            }
        }
    }

    /// Mutable view over the first `len` elements.
    pub(crate) fn slice_mut(&mut self, len: usize) -> HugeSliceMut<'_, T> {
        match self {
            Storage::Single(values) => HugeSliceMut {
                chunks: vec![&mut values[..len]],
                layout: None,
                len,
            },
            Storage::Paged { pages, layout } => {
                let layout = *layout;
                let mut remaining = len;
                let mut chunks = Vec::with_capacity(layout.num_pages_for(len));
                for page in pages.iter_mut() {
                    if remaining == 0 {
                        break;
                    }
                    let take = remaining.min(page.len());
                    chunks.push(&mut page[..take]);
                    remaining -= take;
                }
                HugeSliceMut {
                    chunks,
                    layout: Some(layout),
                    len,
                }
            }
        }
    }
}

/// Mutable view over a contiguous logical range of a huge array.
///
/// The first chunk may start mid-page; every later chunk starts on a page
/// boundary. Two views created from arrays with the same layout and split at
/// the same positions have identical chunk boundaries.
pub struct HugeSliceMut<'a, T> {
    chunks: Vec<&'a mut [T]>,
    layout: Option<PageLayout>,
    len: usize,
}

impl<'a, T> HugeSliceMut<'a, T> {
    /// Number of elements in view.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn locate(&self, index: usize) -> (usize, usize) {
        let first = self.chunks.first().map_or(0, |c| c.len());
        if index < first {
            return (0, index);
        }
        let layout = self
            .layout
            .expect("index past the first chunk of an unpaged view");
        let rest = index - first;
        (1 + layout.page_index(rest), layout.index_in_page(rest))
    }

    /// Element at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> &T {
        debug_assert!(index < self.len);
        let (chunk, offset) = self.locate(index);
        &self.chunks[chunk][offset]
    }

    /// Overwrites the element at `index`.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) {
        debug_assert!(index < self.len);
        let (chunk, offset) = self.locate(index);
        self.chunks[chunk][offset] = value;
    }

    /// The single slice backing this view, if it spans one chunk.
    pub fn as_contiguous(&mut self) -> Option<&mut [T]> {
        match self.chunks.as_mut_slice() {
            [only] => Some(&mut **only),
            [] => Some(&mut []),
            _ => None,
        }
    }

    /// Splits a reborrowed view at `mid` into `[0, mid)` and `[mid, len)`.
    pub fn split_at_mut(&mut self, mid: usize) -> (HugeSliceMut<'_, T>, HugeSliceMut<'_, T>) {
        assert!(mid <= self.len, "split point {mid} beyond length {}", self.len);
        let layout = self.layout;
        let len = self.len;
        let (chunk, offset) = if mid == len {
            (self.chunks.len(), 0)
        } else {
            self.locate(mid)
        };
        let mut left = Vec::with_capacity(chunk + 1);
        let mut right = Vec::with_capacity(self.chunks.len() - chunk.min(self.chunks.len()) + 1);
        for (i, c) in self.chunks.iter_mut().enumerate() {
            let c: &mut [T] = &mut **c;
            if i < chunk {
                left.push(c);
            } else if i == chunk {
                let (head, tail) = c.split_at_mut(offset);
                if !head.is_empty() {
                    left.push(head);
                }
                if !tail.is_empty() {
                    right.push(tail);
                }
            } else {
                right.push(c);
            }
        }
        (
            HugeSliceMut {
                chunks: left,
                layout,
                len: mid,
            },
            HugeSliceMut {
                chunks: right,
                layout,
                len: len - mid,
            },
        )
    }
}

impl<T: Copy> HugeSliceMut<'_, T> {
    /// Copies every element of `self` into `dest`, which must have the same
    /// length and chunk boundaries.
    pub fn copy_into(&self, dest: &mut HugeSliceMut<'_, T>) {
        assert_eq!(self.len, dest.len, "copy between views of different length");
        if self.chunks.len() == dest.chunks.len()
            && self
                .chunks
                .iter()
                .zip(dest.chunks.iter())
                .all(|(a, b)| a.len() == b.len())
        {
            for (src, dst) in self.chunks.iter().zip(dest.chunks.iter_mut()) {
                dst.copy_from_slice(src);
            }
        } else {
            for index in 0..self.len {
                dest.set(index, *self.get(index));
            }
        }
    }
}
