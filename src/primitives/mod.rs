//! Low-level building blocks for the huge collections.
//!
//! Includes page addressing, page creation and the lock-free page
//! directories shared by the arrays, bit sets and id maps.

/// Worker counts and lock-free page directories.
pub mod concurrency;

/// Page creators filling pages from a constant or a generator.
pub mod pages;

/// Page arithmetic, bounds checks and memory estimation.
pub mod paging;
