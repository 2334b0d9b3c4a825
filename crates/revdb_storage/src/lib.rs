//! # RevDB Storage
//!
//! Append-only byte stores used by RevDB to hold each datastore's
//! revision log.
//!
//! Backends never interpret what they hold. Record framing, checksums and
//! replay all live in `revdb_core`; a backend only has to hand back exactly
//! the bytes that were appended and report how many there are.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral datastores and tests
//! - [`FileBackend`] - one file per datastore log
//!
//! ## Example
//!
//! ```rust
//! use revdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let offset = log.append(b"rev-1").unwrap();
//! assert_eq!(log.read_at(offset, 5).unwrap(), b"rev-1");
//! assert_eq!(log.read_to_end(0).unwrap(), b"rev-1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
