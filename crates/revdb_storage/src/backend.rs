//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store holding one revision log.
///
/// # Invariants
///
/// - `append` returns the offset the data starts at, which equals the size
///   before the call
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, everything appended so far survives a crash
/// - `truncate` only ever shrinks the store; it is used to cut a torn tail
///   left behind by an interrupted append
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all appended data and the store's metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Shrinks the store to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads everything from `offset` to the current end.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` is past the end or the read fails.
    fn read_to_end(&self, offset: u64) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        if offset > size {
            return Err(crate::StorageError::ReadPastEnd {
                offset,
                len: 0,
                size,
            });
        }
        let len = usize::try_from(size - offset).map_err(|_| {
            crate::StorageError::Corrupted(format!("log too large to read: {size} bytes"))
        })?;
        self.read_at(offset, len)
    }
}
