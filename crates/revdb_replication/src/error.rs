//! Error types for replication.

use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while replicating.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// The peer could not be reached or refused a request.
    #[error("peer error: {message}")]
    Peer {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A datastore operation failed.
    #[error("datastore error: {0}")]
    Datastore(#[from] revdb_core::CoreError),

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted transition.
        to: String,
    },

    /// The replicator configuration is unusable.
    #[error("invalid replicator configuration: {0}")]
    InvalidConfig(String),

    /// No replicator is registered under the token.
    #[error("no replicator with token {token}")]
    UnknownReplicator {
        /// The token asked for.
        token: u64,
    },

    /// The worker thread could not be started.
    #[error("failed to start replication worker: {0}")]
    Worker(String),

    /// Replication was stopped.
    #[error("replication stopped")]
    Cancelled,
}

impl ReplicationError {
    /// Creates a retryable peer error.
    pub fn peer_retryable(message: impl Into<String>) -> Self {
        Self::Peer {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable peer error.
    pub fn peer_fatal(message: impl Into<String>) -> Self {
        Self::Peer {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplicationError::Peer { retryable, .. } => *retryable,
            ReplicationError::Datastore(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::CoreError;

    #[test]
    fn retryable_errors() {
        assert!(ReplicationError::peer_retryable("connection lost").is_retryable());
        assert!(!ReplicationError::peer_fatal("bad credentials").is_retryable());
        assert!(!ReplicationError::Cancelled.is_retryable());

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        assert!(ReplicationError::from(CoreError::Io(io)).is_retryable());
        assert!(!ReplicationError::from(CoreError::document_not_found("d")).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ReplicationError::UnknownReplicator { token: 7 };
        assert_eq!(err.to_string(), "no replicator with token 7");

        let err = ReplicationError::InvalidStateTransition {
            from: "Started".into(),
            to: "start".into(),
        };
        assert_eq!(err.to_string(), "invalid state transition from Started to start");
    }
}
