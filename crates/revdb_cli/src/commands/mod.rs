//! CLI command implementations.

pub mod conflicts;
pub mod find;
pub mod inspect;
pub mod replicate;

use revdb_core::{Config, DatastoreManager};
use std::path::Path;

/// Opens the manager rooted at `path` without creating anything.
pub(crate) fn open_root(path: &Path) -> Result<DatastoreManager, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No datastore root found at {}", path.display()).into());
    }
    Ok(DatastoreManager::open(path, Config::default())?)
}
