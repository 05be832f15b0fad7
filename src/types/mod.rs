//! Shared error type, result alias and id sentinels.

use thiserror::Error;

/// Sentinel returned by id maps when an id is not present.
pub const NOT_FOUND: i64 = -1;

/// Errors surfaced by the collections layer.
///
/// Bounds violations are not represented here: they panic at the call site,
/// the same way slice indexing does.
#[derive(Debug, Error)]
pub enum CollectionsError {
    /// Push on a stack that already holds `capacity` elements.
    #[error("Stack is full.")]
    StackFull,
    /// Pop or peek on an empty stack.
    #[error("Stack is empty.")]
    StackEmpty,
    /// Add on a queue that already holds `capacity` elements.
    #[error("Queue is full.")]
    QueueFull,
    /// Remove or peek on an empty queue.
    #[error("Queue is empty.")]
    QueueEmpty,
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The element type of an object array has no node property view.
    #[error("values of type `{type_name}` cannot be converted to node properties")]
    UnsupportedConversion {
        /// Rust type name of the stored element.
        type_name: &'static str,
    },
    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(String),
    /// I/O failure while loading configuration.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CollectionsError>;

#[cfg(test)]
mod tests {
    use super::CollectionsError;

    #[test]
    fn capacity_errors_have_descriptive_messages() {
        assert_eq!(CollectionsError::StackFull.to_string(), "Stack is full.");
        assert_eq!(CollectionsError::StackEmpty.to_string(), "Stack is empty.");
        assert_eq!(CollectionsError::QueueFull.to_string(), "Queue is full.");
        assert_eq!(CollectionsError::QueueEmpty.to_string(), "Queue is empty.");
    }

    #[test]
    fn unsupported_conversion_names_the_type() {
        let err = CollectionsError::UnsupportedConversion {
            type_name: "alloc::string::String",
        };
        assert!(err.to_string().contains("cannot be converted"));
        assert!(err.to_string().contains("String"));
    }
}
