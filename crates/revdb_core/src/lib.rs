//! # RevDB Core
//!
//! Revision-tree document store engine for RevDB.
//!
//! This crate provides:
//! - A tagged JSON-like [`Value`] type with a total collation order
//! - Per-document revision trees with deterministic winner selection
//! - A checksummed, group-committed revision log replayed on open, optionally
//!   sealed with AES-256-GCM
//! - Binary attachments stored with each revision
//! - Secondary indexes and a selector-based query engine
//! - Conflict detection and resolution
//! - Replication support: change feeds, revision diffs, history insertion
//!   and persisted checkpoints
//! - A manager for named datastores on disk or in memory
//!
//! ## Key Invariants
//!
//! - Revisions are immutable once stored
//! - Exactly one leaf of every document is current
//! - Sequence numbers strictly increase within a datastore
//! - A change is in the log before it is visible
//! - Indexes are updated under the same lock as the revision they reflect
//!
//! ## Example
//!
//! ```rust
//! use revdb_core::{DatastoreManager, Query, RevisionSelector, Value};
//!
//! let manager = DatastoreManager::in_memory();
//! let people = manager.open_datastore("people").unwrap();
//!
//! let ada = people
//!     .save(Some("ada"), None, Value::object().with("born", 1815), false)
//!     .unwrap();
//! people.ensure_indexed(&["born"], "by_born").unwrap();
//!
//! let query = Query::parse(&serde_json::json!({"born": {"$lt": 1900}}).into()).unwrap();
//! let result = people.find(&query).unwrap();
//! assert_eq!(result.document_ids(), ["ada"]);
//!
//! let current = people.get("ada", RevisionSelector::Current).unwrap();
//! assert_eq!(current.rev_id, ada.rev_id);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachment;
mod checkpoint;
mod config;
mod conflict;
mod crypto;
mod datastore;
mod dir;
mod error;
mod index;
mod log;
mod manager;
mod query;
mod revision;
mod store;
mod tree;
mod value;

pub use attachment::{Attachment, Attachments};
pub use checkpoint::ReplicationDirection;
pub use config::Config;
pub use conflict::{ConflictResolver, KeepCurrent, Resolution};
pub use crypto::{CryptoManager, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use datastore::{Datastore, DatastoreStats, InsertOutcome, RevisionSelector};
pub use dir::DatastoreDir;
pub use error::{CoreError, CoreResult};
pub use index::IndexDefinition;
pub use log::{
    compute_crc32, CheckpointRecord, LogRecord, LogRecordType, Replay, RevisionLog,
    RevisionRecord, ENCRYPTED_FLAG, LOG_MAGIC, LOG_VERSION,
};
pub use manager::{validate_name, DatastoreManager, MAX_NAME_LEN};
pub use query::{
    Condition, Query, QueryIter, QueryPlan, QueryResult, Selector, SortDirection, SortField,
};
pub use revision::{Revision, RevisionId, Sequence};
pub use store::{ChangeEntry, Changes};
pub use tree::RevisionTree;
pub use value::Value;
