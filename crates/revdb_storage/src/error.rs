//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing a backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the store.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current store size.
        size: u64,
    },

    /// Attempted to grow the store with `truncate`.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    InvalidTruncate {
        /// The requested size.
        requested: u64,
        /// The current store size.
        size: u64,
    },

    /// The stored bytes are unusable.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Returns true for failures that may succeed when retried.
    ///
    /// Interrupted and timed-out I/O are transient; everything else is
    /// treated as permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_io_errors() {
        let err = StorageError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow disk"));
        assert!(err.is_transient());

        let err = StorageError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "ro"));
        assert!(!err.is_transient());

        assert!(!StorageError::Corrupted("bad".into()).is_transient());
    }

    #[test]
    fn error_display() {
        let err = StorageError::InvalidTruncate {
            requested: 10,
            size: 4,
        };
        assert_eq!(err.to_string(), "cannot truncate to 10 bytes, store holds 4");
    }
}
