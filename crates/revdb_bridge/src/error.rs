//! Error codes and result types.

use revdb_core::CoreError;
use revdb_replication::ReplicationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error code reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Document, revision, index, datastore, replicator or resolver absent.
    NotFound,
    /// Stale or missing parent revision.
    Conflict,
    /// Index name reused with different fields.
    IndexConflict,
    /// A multi-step change was only partly applied.
    Consistency,
    /// Malformed or missing argument.
    InvalidArgument,
    /// Malformed query.
    InvalidQuery,
    /// Storage, log or lock failure.
    Storage,
    /// Replicator failure.
    Replication,
    /// The action name is not known.
    UnknownAction,
    /// The bridge shut down before the command finished.
    Cancelled,
    /// Missing or wrong datastore key.
    Encryption,
}

impl ErrorCode {
    /// Returns the wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::IndexConflict => "index_conflict",
            ErrorCode::Consistency => "consistency",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::InvalidQuery => "invalid_query",
            ErrorCode::Storage => "storage",
            ErrorCode::Replication => "replication",
            ErrorCode::UnknownAction => "unknown_action",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Encryption => "encryption",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&CoreError> for ErrorCode {
    fn from(err: &CoreError) -> Self {
        match err {
            e if e.is_not_found() => ErrorCode::NotFound,
            CoreError::Conflict { .. } => ErrorCode::Conflict,
            CoreError::IndexConflict { .. } => ErrorCode::IndexConflict,
            CoreError::Consistency { .. } => ErrorCode::Consistency,
            CoreError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            CoreError::InvalidQuery { .. } => ErrorCode::InvalidQuery,
            CoreError::Encryption { .. } => ErrorCode::Encryption,
            _ => ErrorCode::Storage,
        }
    }
}

/// Errors raised while handling a command.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A datastore operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A replicator operation failed.
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// An argument is missing or has the wrong shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The action name is not known.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// No conflict resolution is waiting under the id.
    #[error("no pending resolver with id {0}")]
    UnknownResolver(String),

    /// The bridge was dropped while a resolution waited for the host.
    #[error("resolver {0} was cancelled")]
    Cancelled(String),
}

impl BridgeError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns the code reported to the host.
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::Core(err) => err.into(),
            BridgeError::Replication(ReplicationError::Datastore(err)) => err.into(),
            BridgeError::Replication(ReplicationError::UnknownReplicator { .. }) => {
                ErrorCode::NotFound
            }
            BridgeError::Replication(ReplicationError::InvalidConfig(_)) => {
                ErrorCode::InvalidArgument
            }
            BridgeError::Replication(_) => ErrorCode::Replication,
            BridgeError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            BridgeError::UnknownAction(_) => ErrorCode::UnknownAction,
            BridgeError::UnknownResolver(_) => ErrorCode::NotFound,
            BridgeError::Cancelled(_) => ErrorCode::Cancelled,
        }
    }
}
