//! Datastore directory management.
//!
//! Each on-disk datastore lives in its own directory under the manager's
//! root:
//!
//! ```text
//! <root>/<name>/
//! ├─ LOCK              # Advisory lock, one open handle per process
//! └─ revisions.log     # Revision log
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "revisions.log";

/// An exclusively locked datastore directory.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DatastoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatastoreDir {
    /// Opens or creates a datastore directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the directory doesn't exist and `create_if_missing` is false
    /// - another handle holds the lock (`DatastoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::DatastoreNotFound {
                    name: path.display().to_string(),
                });
            }
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatastoreLocked {
                name: path.display().to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the revision log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Returns true if `path` looks like a datastore directory.
    #[must_use]
    pub fn is_datastore(path: &Path) -> bool {
        path.join(LOG_FILE).is_file()
    }
}
