//! Huge arrays of arbitrary values.

use std::any::{type_name, Any};
use std::fmt;
use std::mem::size_of;

use super::storage::Storage;
use crate::primitives::concurrency::{for_each_parallel, Concurrency};
use crate::primitives::paging::{check_index, estimate, PageLayout, MAX_ARRAY_LENGTH};
use crate::types::{CollectionsError, Result};

/// Object pages hold one pointer-sized page worth of slots.
const OBJECT_LAYOUT: PageLayout = PageLayout::for_element::<usize>();

/// Huge array of optional `T` values.
///
/// Unset slots hold no value: [`get`](Self::get) returns `None` for them and
/// only [`get_or_default`](Self::get_or_default) substitutes a fallback.
#[derive(Clone)]
pub struct HugeObjectArray<T> {
    size: usize,
    storage: Storage<Option<T>>,
}

impl<T> HugeObjectArray<T> {
    /// Array of `size` empty slots, paged when `size` exceeds one allocation.
    pub fn new(size: usize) -> Self {
        if size <= MAX_ARRAY_LENGTH {
            Self::new_single(size)
        } else {
            Self::new_paged(size)
        }
    }

    /// Array of `size` empty slots in one allocation.
    pub fn new_single(size: usize) -> Self {
        Self {
            size,
            storage: Storage::single_with(size, |_| None),
        }
    }

    /// Array of `size` empty slots split into pages.
    pub fn new_paged(size: usize) -> Self {
        Self {
            size,
            storage: Storage::paged_with(size, OBJECT_LAYOUT, |_| None),
        }
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the array has no slots.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the paged layout backs this array.
    pub fn is_paged(&self) -> bool {
        self.storage.is_paged()
    }

    /// Value at `index`, `None` when unset or cleared.
    #[track_caller]
    pub fn get(&self, index: usize) -> Option<&T> {
        check_index(index, self.size);
        self.storage.get(index).as_ref()
    }

    /// Value at `index`, or `default` when unset or cleared.
    #[track_caller]
    pub fn get_or_default<'a>(&'a self, index: usize, default: &'a T) -> &'a T {
        self.get(index).unwrap_or(default)
    }

    /// Stores `value` at `index`, returning the previous value.
    #[track_caller]
    pub fn set(&mut self, index: usize, value: T) -> Option<T> {
        check_index(index, self.size);
        self.storage.get_mut(index).replace(value)
    }

    /// Empties the slot at `index`, returning its value.
    #[track_caller]
    pub fn clear(&mut self, index: usize) -> Option<T> {
        check_index(index, self.size);
        self.storage.get_mut(index).take()
    }

    /// Value at `index`, storing `create()` first when the slot is empty.
    #[track_caller]
    pub fn put_if_absent(&mut self, index: usize, create: impl FnOnce() -> T) -> &T {
        check_index(index, self.size);
        self.storage.get_mut(index).get_or_insert_with(create)
    }

    /// Fills every slot with `generator(index)`.
    pub fn set_all(&mut self, concurrency: Concurrency, generator: impl Fn(usize) -> T + Sync + Send)
    where
        T: Send,
    {
        let mut chunks = self.storage.chunks_mut();
        for_each_parallel(concurrency, &mut chunks, |_, (base, chunk)| {
            for (offset, slot) in chunk.iter_mut().enumerate() {
                *slot = Some(generator(*base + offset));
            }
        });
    }

    /// Slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = Option<&T>> + '_ {
        self.storage
            .chunks()
            .flat_map(|(_, chunk)| chunk.iter().map(Option::as_ref))
    }

    /// Drops all values and returns the bytes held by the slot storage.
    pub fn release(&mut self) -> usize {
        let freed = self.storage.size_in_bytes();
        self.storage = Storage::empty();
        self.size = 0;
        freed
    }

    /// Bytes needed for the slots of an array of `size` elements, excluding
    /// heap memory owned by the values themselves.
    pub fn memory_estimation(size: usize) -> usize {
        let fixed = size_of::<Self>();
        if size <= MAX_ARRAY_LENGTH {
            fixed + estimate::size_of_array::<Option<T>>(size)
        } else {
            fixed + estimate::size_of_paged::<Option<T>>(size, OBJECT_LAYOUT.shift())
        }
    }
}

impl<T: Clone> HugeObjectArray<T> {
    /// Stores a clone of `value` in every slot.
    pub fn fill(&mut self, value: &T) {
        for (_, chunk) in self.storage.chunks_mut() {
            for slot in chunk.iter_mut() {
                *slot = Some(value.clone());
            }
        }
    }

    /// Copies the first `length` slots into `dest` and empties the rest of `dest`.
    #[track_caller]
    pub fn copy_to(&self, dest: &mut HugeObjectArray<T>, length: usize) {
        assert!(
            length <= self.size && length <= dest.size,
            "copy length {length} exceeds source {} or destination {}",
            self.size,
            dest.size
        );
        for index in 0..dest.size {
            *dest.storage.get_mut(index) = if index < length {
                self.storage.get(index).clone()
            } else {
                None
            };
        }
    }
}

impl<T: Any> HugeObjectArray<T> {
    /// Typed node-property view over this array.
    ///
    /// Arrays of `Vec<f64>`, `Vec<f32>` and `Vec<i64>` are supported; any
    /// other element type fails with [`CollectionsError::UnsupportedConversion`].
    pub fn as_node_properties(&self) -> Result<NodePropertyValues<'_>> {
        let any: &dyn Any = self;
        if let Some(values) = any.downcast_ref::<HugeObjectArray<Vec<f64>>>() {
            Ok(NodePropertyValues::DoubleArray(values))
        } else if let Some(values) = any.downcast_ref::<HugeObjectArray<Vec<f32>>>() {
            Ok(NodePropertyValues::FloatArray(values))
        } else if let Some(values) = any.downcast_ref::<HugeObjectArray<Vec<i64>>>() {
            Ok(NodePropertyValues::LongArray(values))
        } else {
            Err(CollectionsError::UnsupportedConversion {
                type_name: type_name::<T>(),
            })
        }
    }
}

impl<T> fmt::Debug for HugeObjectArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HugeObjectArray")
            .field("element", &type_name::<T>())
            .field("size", &self.size)
            .field("paged", &self.is_paged())
            .finish()
    }
}

/// Kind of value exposed by a [`NodePropertyValues`] view.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueType {
    /// `f64` arrays.
    DoubleArray,
    /// `f32` arrays.
    FloatArray,
    /// `i64` arrays.
    LongArray,
}

/// Per-node array property backed by a huge object array.
#[derive(Copy, Clone, Debug)]
pub enum NodePropertyValues<'a> {
    /// Node values are `f64` arrays.
    DoubleArray(&'a HugeObjectArray<Vec<f64>>),
    /// Node values are `f32` arrays.
    FloatArray(&'a HugeObjectArray<Vec<f32>>),
    /// Node values are `i64` arrays.
    LongArray(&'a HugeObjectArray<Vec<i64>>),
}

impl<'a> NodePropertyValues<'a> {
    /// Element kind of the view.
    pub fn value_type(&self) -> ValueType {
        match self {
            NodePropertyValues::DoubleArray(_) => ValueType::DoubleArray,
            NodePropertyValues::FloatArray(_) => ValueType::FloatArray,
            NodePropertyValues::LongArray(_) => ValueType::LongArray,
        }
    }

    /// Number of nodes covered by the view.
    pub fn node_count(&self) -> usize {
        match self {
            NodePropertyValues::DoubleArray(values) => values.size(),
            NodePropertyValues::FloatArray(values) => values.size(),
            NodePropertyValues::LongArray(values) => values.size(),
        }
    }

    /// Value of `node` widened to `f64`, `None` when the node has no value.
    pub fn double_array_value(&self, node: usize) -> Option<Vec<f64>> {
        match self {
            NodePropertyValues::DoubleArray(values) => values.get(node).cloned(),
            NodePropertyValues::FloatArray(values) => values
                .get(node)
                .map(|v| v.iter().map(|&x| f64::from(x)).collect()),
            NodePropertyValues::LongArray(values) => values
                .get(node)
                .map(|v| v.iter().map(|&x| x as f64).collect()),
        }
    }

    /// Value of `node` when the view holds `f32` arrays.
    pub fn float_array_value(&self, node: usize) -> Option<&'a [f32]> {
        match *self {
            NodePropertyValues::FloatArray(values) => values.get(node).map(Vec::as_slice),
            _ => None,
        }
    }

    /// Value of `node` when the view holds `i64` arrays.
    pub fn long_array_value(&self, node: usize) -> Option<&'a [i64]> {
        match *self {
            NodePropertyValues::LongArray(values) => values.get(node).map(Vec::as_slice),
            _ => None,
        }
    }

    /// Length of the longest array stored for any node.
    pub fn max_dimension(&self) -> usize {
        fn longest<T>(values: &HugeObjectArray<Vec<T>>) -> usize {
            values.iter().flatten().map(Vec::len).max().unwrap_or(0)
        }
        match self {
            NodePropertyValues::DoubleArray(values) => longest(values),
            NodePropertyValues::FloatArray(values) => longest(values),
            NodePropertyValues::LongArray(values) => longest(values),
        }
    }
}
