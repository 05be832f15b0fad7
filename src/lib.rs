//! Huge collections for graph analytics.
//!
//! Arrays, bit sets, buffers and id maps that grow past the length of a
//! single allocation by splitting their storage into fixed-size pages, and
//! that can be filled by many threads at once.
//!
//! - [`arrays`]: huge primitive, object and atomic arrays, the concurrent
//!   array builder, sparse arrays and the parallel merge sort.
//! - [`bitset`]: atomic bit sets of fixed, growing and paged capacity.
//! - [`buffers`]: bounded queue and stack on top of huge arrays.
//! - [`idmap`]: mappings between original node ids and dense mapped ids.

#![warn(missing_docs)]

pub mod arrays;
pub mod bitset;
pub mod buffers;
pub mod config;
pub mod idmap;
pub mod primitives;
pub mod types;

pub use config::CollectionsConfig;
pub use primitives::concurrency::Concurrency;
pub use types::{CollectionsError, Result, NOT_FOUND};
