//! Replicator states, status snapshots and events.

use revdb_core::{ReplicationDirection, Sequence};
use std::fmt;

/// Lifecycle state of a replicator.
///
/// ```text
/// Pending -> Started -> Complete
///                    -> Error
///                    -> Stopping -> Stopped
/// ```
///
/// A replicator in `Complete`, `Error` or `Stopped` can be started again and
/// resumes from its checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationState {
    /// Created, never started.
    Pending,
    /// The worker is running batches.
    Started,
    /// Stop was requested; the in-flight batch is finishing.
    Stopping,
    /// Every change up to the end of the source was replicated.
    Complete,
    /// A batch failed after its retries ran out.
    Error,
    /// The worker stopped at a batch boundary after a stop request.
    Stopped,
}

impl ReplicationState {
    /// Returns true if `start` is allowed from this state.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ReplicationState::Pending
                | ReplicationState::Complete
                | ReplicationState::Stopped
                | ReplicationState::Error
        )
    }

    /// Returns true while a worker is running.
    pub fn is_active(&self) -> bool {
        matches!(self, ReplicationState::Started | ReplicationState::Stopping)
    }

    /// Returns the state name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReplicationState::Pending => "Pending",
            ReplicationState::Started => "Started",
            ReplicationState::Stopping => "Stopping",
            ReplicationState::Complete => "Complete",
            ReplicationState::Error => "Error",
            ReplicationState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot of a replicator's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationStatus {
    /// Current state.
    pub state: ReplicationState,
    /// Message of the error that ended the last run, if any.
    pub last_error: Option<String>,
    /// Changed documents handled in the current run.
    pub documents_processed: u64,
    /// Batches fully applied and checkpointed in the current run.
    pub batches_completed: u64,
    /// Upper bound on the changes the current run has to handle.
    pub total_estimate: u64,
    /// Documents that became conflicted in the current run.
    pub conflicts_detected: u64,
}

impl Default for ReplicationStatus {
    fn default() -> Self {
        Self {
            state: ReplicationState::Pending,
            last_error: None,
            documents_processed: 0,
            batches_completed: 0,
            total_estimate: 0,
            conflicts_detected: 0,
        }
    }
}

/// Something that happened to a replicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// The state changed.
    StateChanged {
        /// Previous state.
        from: ReplicationState,
        /// New state.
        to: ReplicationState,
    },
    /// A batch was applied and its checkpoint persisted.
    BatchCompleted {
        /// Which leg the batch belonged to.
        direction: ReplicationDirection,
        /// Changed documents in the batch.
        documents: u64,
        /// Source sequence the checkpoint moved to.
        checkpoint: Sequence,
    },
    /// The run finished.
    Complete {
        /// Changed documents handled in the run.
        documents_replicated: u64,
    },
    /// The run failed.
    Error {
        /// Error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_allowed_from_idle_states() {
        for state in [
            ReplicationState::Pending,
            ReplicationState::Complete,
            ReplicationState::Stopped,
            ReplicationState::Error,
        ] {
            assert!(state.can_start(), "{state}");
            assert!(!state.is_active());
        }
        assert!(!ReplicationState::Started.can_start());
        assert!(!ReplicationState::Stopping.can_start());
        assert!(ReplicationState::Stopping.is_active());
    }

    #[test]
    fn default_status_is_pending() {
        let status = ReplicationStatus::default();
        assert_eq!(status.state, ReplicationState::Pending);
        assert_eq!(status.documents_processed, 0);
        assert!(status.last_error.is_none());
    }
}
