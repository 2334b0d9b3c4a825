//! Error types for RevDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in RevDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] revdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The revision log is corrupted.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Document does not exist, or its current revision is deleted.
    #[error("document not found: {doc_id}")]
    DocumentNotFound {
        /// The document that was looked up.
        doc_id: String,
    },

    /// The named revision does not exist in the document's tree.
    #[error("revision {rev_id} not found for document {doc_id}")]
    RevisionNotFound {
        /// The document that was looked up.
        doc_id: String,
        /// The missing revision.
        rev_id: String,
    },

    /// No index with this name exists.
    #[error("index not found: {name}")]
    IndexNotFound {
        /// Name of the index.
        name: String,
    },

    /// No datastore with this name exists.
    #[error("datastore not found: {name}")]
    DatastoreNotFound {
        /// Name of the datastore.
        name: String,
    },

    /// A write named a parent that is not the current leaf.
    #[error("conflict on document {doc_id}: {message}")]
    Conflict {
        /// The document being written.
        doc_id: String,
        /// What made the write stale.
        message: String,
    },

    /// An index with the same name but different fields already exists.
    #[error("index {name} already exists with fields {existing:?}")]
    IndexConflict {
        /// Name of the index.
        name: String,
        /// Fields of the existing definition.
        existing: Vec<String>,
    },

    /// A multi-revision operation left the document in an unexpected state.
    #[error("consistency error: {message}")]
    Consistency {
        /// Description of the failure.
        message: String,
    },

    /// An argument was malformed or out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A query selector, sort or projection was malformed.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// Another process holds the datastore directory lock.
    #[error("datastore locked: {name} is open in another process")]
    DatastoreLocked {
        /// Name or path of the datastore.
        name: String,
    },

    /// The encryption key is missing, wrong or not expected.
    #[error("encryption error: {message}")]
    Encryption {
        /// Description of the failure.
        message: String,
    },

    /// The datastore was deleted or closed.
    #[error("datastore is closed: {name}")]
    DatastoreClosed {
        /// Name of the datastore.
        name: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a document not found error.
    pub fn document_not_found(doc_id: impl Into<String>) -> Self {
        Self::DocumentNotFound {
            doc_id: doc_id.into(),
        }
    }

    /// Creates a revision not found error.
    pub fn revision_not_found(doc_id: impl Into<String>, rev_id: impl ToString) -> Self {
        Self::RevisionNotFound {
            doc_id: doc_id.into(),
            rev_id: rev_id.to_string(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(doc_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            doc_id: doc_id.into(),
            message: message.into(),
        }
    }

    /// Creates a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Returns true if the error reports a missing document, revision,
    /// index or datastore.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DocumentNotFound { .. }
                | Self::RevisionNotFound { .. }
                | Self::IndexNotFound { .. }
                | Self::DatastoreNotFound { .. }
        )
    }

    /// Returns true for failures that may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_transient(),
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
