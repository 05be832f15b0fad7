use crate::arrays::{HugeArray, HugeElement};
use crate::types::{CollectionsError, Result};

/// Bounded LIFO stack over a huge array.
#[derive(Debug)]
pub struct HugeArrayStack<T: HugeElement> {
    array: HugeArray<T>,
    capacity: usize,
    top: usize,
}

/// Stack of `i64`.
pub type HugeLongArrayStack = HugeArrayStack<i64>;
/// Stack of `f64`.
pub type HugeDoubleArrayStack = HugeArrayStack<f64>;

impl<T: HugeElement> HugeArrayStack<T> {
    /// Empty stack holding at most `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        Self {
            array: HugeArray::new(capacity),
            capacity,
            top: 0,
        }
    }

    /// Pushes `value`.
    pub fn push(&mut self, value: T) -> Result<()> {
        if self.top == self.capacity {
            return Err(CollectionsError::StackFull);
        }
        self.array.set(self.top, value);
        self.top += 1;
        Ok(())
    }

    /// Pops the most recently pushed element.
    pub fn pop(&mut self) -> Result<T> {
        let value = self.peek()?;
        self.top -= 1;
        Ok(value)
    }

    /// Most recently pushed element without removing it.
    pub fn peek(&self) -> Result<T> {
        if self.top == 0 {
            return Err(CollectionsError::StackEmpty);
        }
        Ok(self.array.get(self.top - 1))
    }

    /// Number of stacked elements.
    pub fn size(&self) -> usize {
        self.top
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    /// Maximum number of elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes needed for a stack of `capacity` elements.
    pub fn memory_estimation(capacity: usize) -> usize {
        std::mem::size_of::<Self>() - std::mem::size_of::<HugeArray<T>>()
            + HugeArray::<T>::memory_estimation(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_order() {
        let mut stack = HugeLongArrayStack::new(2);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert_eq!(stack.push(3).unwrap_err().to_string(), "Stack is full.");
        assert_eq!(stack.peek().unwrap(), 2);
        assert_eq!(stack.pop().unwrap(), 2);
        assert_eq!(stack.pop().unwrap(), 1);
        assert_eq!(stack.pop().unwrap_err().to_string(), "Stack is empty.");
        assert!(stack.is_empty());
    }

    #[test]
    fn zero_capacity_stack() {
        let mut stack = HugeDoubleArrayStack::new(0);
        assert!(matches!(stack.push(1.0), Err(CollectionsError::StackFull)));
        assert!(matches!(stack.pop(), Err(CollectionsError::StackEmpty)));
        assert!(matches!(stack.peek(), Err(CollectionsError::StackEmpty)));
    }
}
