//! # RevDB Bridge
//!
//! Message bridge between RevDB and host applications.
//!
//! This crate provides:
//! - JSON commands addressed by action name with positional arguments
//! - A response stream per command token
//! - Error code mapping
//! - Document JSON conversion (`_id`, `_rev`, `_deleted` and base64
//!   `_attachments` metadata)
//! - Replication event forwarding and host-driven conflict resolution
//! - Password-derived keys for encrypted datastores
//! - Replication with remote URLs through a host-supplied HTTP client
//!
//! ## Example
//!
//! ```rust
//! use revdb_bridge::{Bridge, Command};
//! use serde_json::json;
//!
//! let bridge = Bridge::in_memory();
//! let opened = bridge
//!     .dispatch(Command::new(1, "openDatastore", vec![json!("notes")]))
//!     .recv()
//!     .unwrap();
//! assert_eq!(opened.payload(), Some(&json!({"name": "notes"})));
//!
//! let saved = bridge
//!     .dispatch(Command::new(
//!         2,
//!         "createOrUpdateDocumentFromRevision",
//!         vec![json!("notes"), json!({"_id": "n1", "text": "hello"})],
//!     ))
//!     .recv()
//!     .unwrap();
//! assert!(!saved.keep_callback);
//! assert_eq!(saved.payload().unwrap()["_id"], "n1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bridge;
mod document;
mod error;
mod message;
mod resolver;

pub use bridge::Bridge;
pub use document::{
    revision_to_json, DocumentInput, DOC_ATTACHMENTS, DOC_DELETED, DOC_ID, DOC_REV,
};
pub use error::{BridgeError, BridgeResult, ErrorCode};
pub use message::{Action, Command, Failure, Response, ResponseStream};
