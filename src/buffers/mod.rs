//! Fixed-capacity queue and stack backed by huge arrays.
//!
//! Overflow and underflow are reported as errors, never wrapped around.

mod queue;
mod stack;

pub use queue::{HugeArrayQueue, HugeDoubleArrayQueue, HugeLongArrayQueue};
pub use stack::{HugeArrayStack, HugeDoubleArrayStack, HugeLongArrayStack};
