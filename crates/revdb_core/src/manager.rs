//! Named datastores under one root.

use crate::config::Config;
use crate::crypto::EncryptionKey;
use crate::datastore::Datastore;
use crate::dir::DatastoreDir;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use revdb_storage::InMemoryBackend;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Longest accepted datastore name.
pub const MAX_NAME_LEN: usize = 128;

/// Opens, lists and deletes datastores by name.
///
/// A directory-rooted manager keeps each datastore in `<root>/<name>/`; an
/// in-memory manager keeps them only as long as they are open. Opening a
/// name that is already open returns the same handle.
#[derive(Debug)]
pub struct DatastoreManager {
    root: Option<PathBuf>,
    config: Config,
    open: Mutex<BTreeMap<String, Arc<Datastore>>>,
}

impl DatastoreManager {
    /// Creates a manager rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the root cannot be created.
    pub fn open(root: &Path, config: Config) -> CoreResult<Self> {
        std::fs::create_dir_all(root)?;
        tracing::debug!(root = %root.display(), "datastore manager opened");
        Ok(Self {
            root: Some(root.to_path_buf()),
            config,
            open: Mutex::new(BTreeMap::new()),
        })
    }

    /// Creates a manager whose datastores live in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            root: None,
            config: Config::default(),
            open: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the root directory, if any.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn path_of(&self, name: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(name))
    }

    /// Opens a datastore, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad name, `DatastoreLocked` if
    /// another process holds it, `Encryption` if it is encrypted, or a
    /// recovery error.
    pub fn open_datastore(&self, name: &str) -> CoreResult<Arc<Datastore>> {
        self.open_with_key(name, None)
    }

    /// Opens or creates a datastore whose log is sealed with `key`.
    ///
    /// # Errors
    ///
    /// Returns `Encryption` if the datastore is not encrypted or uses a
    /// different key, including when it is already open; otherwise the
    /// errors of [`DatastoreManager::open_datastore`].
    pub fn open_encrypted_datastore(
        &self,
        name: &str,
        key: EncryptionKey,
    ) -> CoreResult<Arc<Datastore>> {
        self.open_with_key(name, Some(key))
    }

    fn open_with_key(&self, name: &str, key: Option<EncryptionKey>) -> CoreResult<Arc<Datastore>> {
        validate_name(name)?;
        let mut open = self.open.lock();
        if let Some(existing) = open.get(name) {
            let wanted = key.as_ref().map(EncryptionKey::fingerprint);
            return match (existing.key_fingerprint(), wanted.as_deref()) {
                (open_with, asked) if open_with == asked => Ok(Arc::clone(existing)),
                (Some(_), None) => Err(CoreError::encryption(format!(
                    "datastore {name} is encrypted; a key is required"
                ))),
                (None, Some(_)) => Err(CoreError::encryption(format!(
                    "datastore {name} is not encrypted but a key was given"
                ))),
                _ => Err(CoreError::encryption(format!(
                    "datastore {name} is open with a different key"
                ))),
            };
        }

        let encrypted = key.is_some();
        let config = self.config.clone().encryption_key(key);
        let datastore = match self.path_of(name) {
            Some(path) => Datastore::open(&path, name, config)?,
            None => Datastore::open_with_backend(name, config, Box::new(InMemoryBackend::new()))?,
        };
        let datastore = Arc::new(datastore);
        open.insert(name.to_string(), Arc::clone(&datastore));
        tracing::info!(datastore = name, encrypted, "datastore ready");
        Ok(datastore)
    }

    /// Returns an existing datastore without creating one.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreNotFound` if no datastore has that name.
    pub fn get_datastore(&self, name: &str) -> CoreResult<Arc<Datastore>> {
        validate_name(name)?;
        let mut open = self.open.lock();
        if let Some(existing) = open.get(name) {
            return Ok(Arc::clone(existing));
        }

        let path = self
            .path_of(name)
            .filter(|p| DatastoreDir::is_datastore(p))
            .ok_or_else(|| CoreError::DatastoreNotFound {
                name: name.to_string(),
            })?;
        let config = self.config.clone().create_if_missing(false);
        let datastore = Arc::new(Datastore::open(&path, name, config)?);
        open.insert(name.to_string(), Arc::clone(&datastore));
        Ok(datastore)
    }

    /// Closes a datastore and removes its files.
    ///
    /// Handles still held elsewhere fail with `DatastoreClosed` afterwards.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreNotFound` if no datastore has that name, or an I/O
    /// error if its directory cannot be removed.
    pub fn delete_datastore(&self, name: &str) -> CoreResult<()> {
        validate_name(name)?;
        let removed = self.open.lock().remove(name);
        if let Some(datastore) = &removed {
            datastore.close();
        }

        let on_disk = self.path_of(name).filter(|p| DatastoreDir::is_datastore(p));
        if removed.is_none() && on_disk.is_none() {
            return Err(CoreError::DatastoreNotFound {
                name: name.to_string(),
            });
        }
        drop(removed);

        if let Some(path) = on_disk {
            std::fs::remove_dir_all(&path)?;
        }
        tracing::info!(datastore = name, "datastore deleted");
        Ok(())
    }

    /// Lists every datastore name, open or on disk, sorted.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the root cannot be read.
    pub fn list_datastores(&self) -> CoreResult<Vec<String>> {
        let mut names: Vec<String> = self.open.lock().keys().cloned().collect();
        if let Some(root) = &self.root {
            for entry in std::fs::read_dir(root)? {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if validate_name(&name).is_ok() && DatastoreDir::is_datastore(&entry.path()) {
                    names.push(name);
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Closes every open datastore.
    pub fn close_all(&self) {
        let open = std::mem::take(&mut *self.open.lock());
        for datastore in open.values() {
            datastore.close();
        }
    }
}

/// Checks a datastore name: 1 to 128 characters from `[A-Za-z0-9_-]`.
///
/// # Errors
///
/// Returns `InvalidArgument` for anything else.
pub fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(CoreError::invalid_argument(format!(
            "datastore name must be 1 to {MAX_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(CoreError::invalid_argument(format!(
            "datastore name {name:?} contains {bad:?}"
        )));
    }
    Ok(())
}
