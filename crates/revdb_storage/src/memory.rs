//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An in-memory backend for ephemeral datastores and tests.
///
/// The byte buffer is reference counted: [`InMemoryBackend::share`] returns
/// a second handle over the same bytes, which lets a test "reopen" a
/// datastore and replay its log without touching the file system.
///
/// Appends can be made to fail on demand with
/// [`InMemoryBackend::fail_next_appends`] to exercise error paths.
///
/// # Example
///
/// ```rust
/// use revdb_storage::{InMemoryBackend, StorageBackend};
///
/// let mut first = InMemoryBackend::new();
/// first.append(b"abc").unwrap();
///
/// let second = first.share();
/// assert_eq!(second.size().unwrap(), 3);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    failing_appends: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            failing_appends: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns another handle over the same bytes.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            failing_appends: Arc::clone(&self.failing_appends),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes the next `count` appends fail with a transient I/O error.
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let remaining = self.failing_appends.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_appends.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Interrupted,
                "injected append failure",
            )));
        }

        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(10, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn shared_handles_see_same_bytes() {
        let mut first = InMemoryBackend::new();
        let mut second = first.share();

        first.append(b"ab").unwrap();
        second.append(b"cd").unwrap();

        assert_eq!(first.data(), b"abcd");
        assert_eq!(second.read_to_end(1).unwrap(), b"bcd");
    }

    #[test]
    fn injected_failures_are_transient_and_consumed() {
        let mut backend = InMemoryBackend::new();
        backend.fail_next_appends(2);

        let err = backend.append(b"x").unwrap_err();
        assert!(err.is_transient());
        assert!(backend.append(b"x").is_err());
        assert_eq!(backend.append(b"x").unwrap(), 0);
        assert_eq!(backend.size().unwrap(), 1);
    }

    #[test]
    fn truncate_only_shrinks() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::InvalidTruncate { .. })
        ));
    }
}
