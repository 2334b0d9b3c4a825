//! Replication checkpoints.
//!
//! A checkpoint records the last source sequence a replication has fully
//! applied to its target. Checkpoints are stored in the log of the local
//! datastore, keyed by replication id and direction, so a restarted
//! replication resumes where the previous run stopped.

use crate::error::{CoreError, CoreResult};
use crate::revision::Sequence;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Which way a replication moves revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationDirection {
    /// Local datastore to remote peer.
    Push,
    /// Remote peer to local datastore.
    Pull,
}

impl ReplicationDirection {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl fmt::Display for ReplicationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicationDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            other => Err(CoreError::invalid_argument(format!(
                "unknown replication direction: {other}"
            ))),
        }
    }
}

/// In-memory view of every checkpoint stored in one datastore.
#[derive(Debug, Default, Clone)]
pub(crate) struct CheckpointStore {
    entries: HashMap<(String, ReplicationDirection), Sequence>,
}

impl CheckpointStore {
    pub(crate) fn get(&self, replication_id: &str, direction: ReplicationDirection) -> Option<Sequence> {
        self.entries
            .get(&(replication_id.to_string(), direction))
            .copied()
    }

    pub(crate) fn set(
        &mut self,
        replication_id: &str,
        direction: ReplicationDirection,
        sequence: Sequence,
    ) {
        self.entries
            .insert((replication_id.to_string(), direction), sequence);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parsing() {
        assert_eq!("PUSH".parse::<ReplicationDirection>().unwrap(), ReplicationDirection::Push);
        assert_eq!("pull".parse::<ReplicationDirection>().unwrap(), ReplicationDirection::Pull);
        assert!("sideways".parse::<ReplicationDirection>().is_err());
        assert_eq!(ReplicationDirection::Pull.to_string(), "pull");
    }

    #[test]
    fn checkpoints_are_keyed_by_direction() {
        let mut store = CheckpointStore::default();
        store.set("r1", ReplicationDirection::Push, 4);
        store.set("r1", ReplicationDirection::Pull, 9);
        store.set("r1", ReplicationDirection::Push, 6);

        assert_eq!(store.get("r1", ReplicationDirection::Push), Some(6));
        assert_eq!(store.get("r1", ReplicationDirection::Pull), Some(9));
        assert_eq!(store.get("r2", ReplicationDirection::Pull), None);
        assert_eq!(store.len(), 2);
    }
}
