//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A backend storing one revision log in a single file.
///
/// `flush` hands buffered data to the OS; `sync` calls `File::sync_all` so
/// the data and the file length survive power loss.
///
/// # Example
///
/// ```no_run
/// use revdb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("notes/revisions.log")).unwrap();
/// log.append(b"record").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// File handle and cached length, updated together.
    inner: Mutex<(File, u64)>,
}

impl FileBackend {
    /// Opens or creates the log file at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories or the file cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new((file, size)),
        })
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut guard = self.inner.lock();
        let size = guard.1;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let file = &mut guard.0;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut guard = self.inner.lock();
        let offset = guard.1;
        if data.is_empty() {
            return Ok(offset);
        }

        let file = &mut guard.0;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        guard.1 += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.lock().0.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().1)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.lock().0.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut guard = self.inner.lock();
        if new_size > guard.1 {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: guard.1,
            });
        }
        guard.0.set_len(new_size)?;
        guard.0.sync_all()?;
        guard.1 = new_size;
        Ok(())
    }
}
