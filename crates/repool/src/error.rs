//! Error types for pool operations.

use thiserror::Error;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors surfaced by the buffer pool.
///
/// A release whose element count disagrees with the count recorded at
/// acquisition is caller corruption and asserts instead of returning a
/// variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The backing allocator could not produce the requested storage.
    ///
    /// When surfaced from an acquire, the pool has already drained every
    /// free list in the process and retried once.
    #[error("out of memory: failed to allocate {count} elements of {element}")]
    OutOfMemory {
        /// Requested element count.
        count: usize,
        /// Element type name.
        element: &'static str,
    },

    /// A released buffer was not found in any shard of its manager.
    #[error("unknown buffer: {addr:#x} is not tracked by this pool")]
    UnknownBuffer {
        /// Base address of the rejected buffer.
        addr: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = PoolError::OutOfMemory {
            count: 64,
            element: "u64",
        };
        assert_eq!(
            err.to_string(),
            "out of memory: failed to allocate 64 elements of u64"
        );

        let err = PoolError::UnknownBuffer { addr: 0xdead };
        assert!(err.to_string().contains("0xdead"));
    }
}
