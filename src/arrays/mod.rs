//! Huge arrays addressed by 64-bit indices.
//!
//! Plain arrays ([`HugeArray`]), atomic arrays ([`HugeAtomicArray`]), object
//! arrays, the concurrent bulk builder, the page-sparse long array, and merge
//! sort over long arrays.

mod storage;

pub mod atomic;
pub mod builder;
pub mod huge;
pub mod object;
pub mod sort;
pub mod sparse;

pub use atomic::{AtomicValue, HugeAtomicArray, HugeAtomicDoubleArray, HugeAtomicLongArray};
pub use builder::{Allocator, HugeLongArrayBuilder};
pub use huge::{
    HugeArray, HugeByteArray, HugeDoubleArray, HugeElement, HugeLongArray,
};
pub use object::{HugeObjectArray, NodePropertyValues, ValueType};
pub use sort::{merge_sort, sort_indirect, HugeMergeSort};
pub use sparse::{GrowingBuilder, HugeSparseLongArray};
pub use storage::HugeSliceMut;
