//! Page creators: allocate the pages of a huge array and fill them.
//!
//! A creator either writes a constant or evaluates a generator with the
//! global index of every element. Element `k` of page `p` has global index
//! `p * page_size + k`.

use std::fmt;
use std::sync::Arc;

use super::concurrency::{for_each_parallel, Concurrency};
use super::paging::PageLayout;

type Generator<T> = Arc<dyn Fn(usize) -> T + Send + Sync>;

enum Fill<T> {
    Constant(T),
    Generated(Generator<T>),
}

impl<T: Copy> Clone for Fill<T> {
    fn clone(&self) -> Self {
        match self {
            Fill::Constant(value) => Fill::Constant(*value),
            Fill::Generated(f) => Fill::Generated(Arc::clone(f)),
        }
    }
}

/// Fills freshly allocated pages, optionally spreading pages over workers.
pub struct PageCreator<T> {
    fill: Fill<T>,
    concurrency: Concurrency,
}

impl<T: Copy> Clone for PageCreator<T> {
    fn clone(&self) -> Self {
        Self {
            fill: self.fill.clone(),
            concurrency: self.concurrency,
        }
    }
}

impl<T: Copy + Send + Sync + 'static> PageCreator<T> {
    /// Sequential creator writing `value` everywhere.
    pub fn constant(value: T) -> Self {
        Self {
            fill: Fill::Constant(value),
            concurrency: Concurrency::SEQUENTIAL,
        }
    }

    /// Sequential creator writing `generator(global_index)`.
    pub fn generator(generator: impl Fn(usize) -> T + Send + Sync + 'static) -> Self {
        Self {
            fill: Fill::Generated(Arc::new(generator)),
            concurrency: Concurrency::SEQUENTIAL,
        }
    }

    /// Same creator, filling pages with up to `concurrency` workers.
    pub fn parallel(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Worker bound used when filling.
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Value written at `global_index`.
    #[inline]
    pub fn value_at(&self, global_index: usize) -> T {
        match &self.fill {
            Fill::Constant(value) => *value,
            Fill::Generated(f) => f(global_index),
        }
    }

    /// Fills `page` whose first element has global index `base`.
    pub fn fill_page<X>(&self, page: &mut [X], base: usize, wrap: impl Fn(T) -> X) {
        for (offset, slot) in page.iter_mut().enumerate() {
            *slot = wrap(self.value_at(base + offset));
        }
    }

    /// Allocates every page in `pages` and fills it. All pages but the last
    /// hold `1 << page_shift` elements; the last holds `last_page_size`.
    pub fn fill<X, W>(&self, pages: &mut [Box<[X]>], last_page_size: usize, page_shift: u32, wrap: W)
    where
        X: Send,
        W: Fn(T) -> X + Sync + Send,
    {
        let layout = PageLayout::with_shift(page_shift);
        let last = pages.len().saturating_sub(1);
        for_each_parallel(self.concurrency, pages, |page_index, page| {
            let len = if page_index == last {
                last_page_size
            } else {
                layout.page_size()
            };
            let base = layout.global_index(page_index, 0);
            *page = (0..len).map(|offset| wrap(self.value_at(base + offset))).collect();
        });
    }

    /// Allocates and fills the pages for `capacity` elements.
    pub fn create_pages<X, W>(&self, capacity: usize, layout: PageLayout, wrap: W) -> Vec<Box<[X]>>
    where
        X: Send,
        W: Fn(T) -> X + Sync + Send,
    {
        let mut pages: Vec<Box<[X]>> = (0..layout.num_pages_for(capacity))
            .map(|_| Box::default())
            .collect();
        self.fill(&mut pages, layout.last_page_size(capacity), layout.shift(), wrap);
        pages
    }
}

impl<T: fmt::Debug> fmt::Debug for PageCreator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fill = match &self.fill {
            Fill::Constant(value) => format!("constant({value:?})"),
            Fill::Generated(_) => "generator".to_string(),
        };
        f.debug_struct("PageCreator")
            .field("fill", &fill)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_fill_respects_last_page() {
        let creator = PageCreator::constant(7i64);
        let pages = creator.create_pages(10, PageLayout::with_shift(2), |v| v);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].len(), 4);
        assert_eq!(pages[2].len(), 2);
        assert!(pages.iter().flat_map(|p| p.iter()).all(|&v| v == 7));
    }

    #[test]
    fn generator_sees_global_indices() {
        for concurrency in [Concurrency::SEQUENTIAL, Concurrency::new(4)] {
            let creator = PageCreator::generator(|i| i as i64 * 3).parallel(concurrency);
            let pages = creator.create_pages(1000, PageLayout::with_shift(5), |v| v);
            let flat: Vec<i64> = pages.iter().flat_map(|p| p.iter().copied()).collect();
            let expected: Vec<i64> = (0..1000).map(|i| i * 3).collect();
            assert_eq!(flat, expected);
        }
    }

    #[test]
    fn fill_existing_page_with_offset() {
        let creator = PageCreator::generator(|i| i as u8);
        let mut page = [0u8; 4];
        creator.fill_page(&mut page, 10, |v| v);
        assert_eq!(page, [10, 11, 12, 13]);
    }
}
