use crate::arrays::{HugeArray, HugeElement};
use crate::types::{CollectionsError, Result};

/// Bounded FIFO ring over a huge array.
#[derive(Debug)]
pub struct HugeArrayQueue<T: HugeElement> {
    array: HugeArray<T>,
    capacity: usize,
    head: usize,
    tail: usize,
    size: usize,
}

/// Queue of `i64`.
pub type HugeLongArrayQueue = HugeArrayQueue<i64>;
/// Queue of `f64`.
pub type HugeDoubleArrayQueue = HugeArrayQueue<f64>;

impl<T: HugeElement> HugeArrayQueue<T> {
    /// Empty queue holding at most `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        Self {
            array: HugeArray::new(capacity),
            capacity,
            head: 0,
            tail: 0,
            size: 0,
        }
    }

    /// Appends `value` at the tail.
    pub fn add(&mut self, value: T) -> Result<()> {
        if self.size == self.capacity {
            return Err(CollectionsError::QueueFull);
        }
        self.array.set(self.tail, value);
        self.tail = (self.tail + 1) % self.capacity;
        self.size += 1;
        Ok(())
    }

    /// Removes and returns the head element.
    pub fn remove(&mut self) -> Result<T> {
        let value = self.peek()?;
        self.head = (self.head + 1) % self.capacity;
        self.size -= 1;
        Ok(value)
    }

    /// Head element without removing it.
    pub fn peek(&self) -> Result<T> {
        if self.size == 0 {
            return Err(CollectionsError::QueueEmpty);
        }
        Ok(self.array.get(self.head))
    }

    /// Number of queued elements.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether no element is queued.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Maximum number of elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes needed for a queue of `capacity` elements.
    pub fn memory_estimation(capacity: usize) -> usize {
        std::mem::size_of::<Self>() - std::mem::size_of::<HugeArray<T>>()
            + HugeArray::<T>::memory_estimation(capacity)
    }
}
