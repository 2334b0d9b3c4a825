//! # RevDB Testkit
//!
//! Test utilities for RevDB.
//!
//! This crate provides:
//! - Datastore fixtures, in memory or in a temporary directory
//! - Ready-made scenarios (populated and conflicted datastores)
//! - Property-based test generators using proptest
//! - A crashable storage backend for log recovery tests
//!
//! ## Usage
//!
//! ```rust
//! use revdb_testkit::prelude::*;
//!
//! with_temp_datastore(|ds| {
//!     ds.save(Some("a"), None, body(serde_json::json!({"n": 1})), false)
//!         .unwrap();
//!     assert_eq!(ds.document_count().unwrap(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
