//! Crash simulation for revision log recovery tests.
//!
//! [`CrashableBackend`] wraps a shared [`InMemoryBackend`] and "crashes"
//! after a byte budget: the append that crosses the budget writes only the
//! bytes up to it, and every later write (truncate included) fails. The
//! torn bytes stay in the shared buffer, so reopening a datastore over
//! [`CrashableBackend::surviving`] replays exactly what a real crash would
//! leave on disk.
//!
//! ## Usage
//!
//! ```rust
//! use revdb_core::{Config, Datastore, Value};
//! use revdb_testkit::crash::CrashableBackend;
//!
//! let backend = CrashableBackend::new();
//! let ds = Datastore::open_with_backend("t", Config::default(), Box::new(backend.handle()))
//!     .unwrap();
//! ds.save(Some("kept"), None, Value::object(), false).unwrap();
//!
//! backend.crash_after(backend.bytes_written() + 20);
//! assert!(ds.save(Some("lost"), None, Value::object(), false).is_err());
//! drop(ds);
//!
//! let ds = Datastore::open_with_backend("t", Config::default(), Box::new(backend.surviving()))
//!     .unwrap();
//! assert_eq!(ds.document_ids().unwrap(), ["kept"]);
//! ```

use revdb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicU64,
    crashed: AtomicBool,
}

/// A storage backend that can simulate a crash mid-append.
#[derive(Debug)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Creates a backend over an empty buffer that never crashes until told
    /// to.
    pub fn new() -> Self {
        Self {
            inner: InMemoryBackend::new(),
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicU64::new(u64::MAX),
                crashed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns another handle sharing the buffer and the crash state.
    pub fn handle(&self) -> Self {
        Self {
            inner: self.inner.share(),
            state: Arc::clone(&self.state),
        }
    }

    /// Returns a plain backend over the bytes that survived, as a restarted
    /// process would see them.
    pub fn surviving(&self) -> InMemoryBackend {
        self.inner.share()
    }

    /// Crashes once the log reaches `bytes` bytes.
    pub fn crash_after(&self, bytes: u64) {
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Returns the number of bytes in the buffer.
    pub fn bytes_written(&self) -> u64 {
        self.inner.size().unwrap_or(0)
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl Default for CrashableBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        if self.has_crashed() {
            return Err(self.crash("append"));
        }

        let current = self.inner.size()?;
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);
        let end = current + bytes.len() as u64;
        if end > threshold {
            let partial = usize::try_from(threshold.saturating_sub(current)).unwrap_or(0);
            if partial > 0 {
                self.inner.append(&bytes[..partial])?;
            }
            return Err(self.crash("partial append"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("truncate"));
        }
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_append_leaves_torn_bytes() {
        let backend = CrashableBackend::new();
        let mut handle = backend.handle();
        handle.append(b"0123").unwrap();

        backend.crash_after(6);
        assert!(handle.append(b"4567").is_err());
        assert!(backend.has_crashed());
        assert_eq!(backend.surviving().data(), b"012345");

        assert!(handle.truncate(4).is_err());
        assert!(handle.append(b"x").is_err());
    }
}
