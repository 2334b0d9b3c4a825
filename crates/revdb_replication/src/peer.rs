//! The other side of a replication.

use crate::error::ReplicationResult;
use revdb_core::{Changes, Datastore, InsertOutcome, Revision, RevisionId, Sequence};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A replica revisions can be read from and written to.
///
/// This trait abstracts where the other datastore lives, allowing for
/// different implementations (another local datastore, a network client,
/// a fault-injecting wrapper in tests). The replicator drives both sides of
/// a run through it, so the local datastore is wrapped the same way.
pub trait ReplicationPeer: Send + Sync {
    /// Returns a stable identifier used to derive replication ids.
    fn identifier(&self) -> String;

    /// Returns the highest sequence the replica has assigned.
    fn last_sequence(&self) -> ReplicationResult<Sequence>;

    /// Lists documents changed after `since`.
    fn changes_since(&self, since: Sequence, limit: usize) -> ReplicationResult<Changes>;

    /// Returns the revisions in `revs` the replica does not have.
    fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<RevisionId>>,
    ) -> ReplicationResult<BTreeMap<String, Vec<RevisionId>>>;

    /// Returns the chain of revisions from the root to `rev_id`.
    fn history(&self, doc_id: &str, rev_id: &RevisionId) -> ReplicationResult<Vec<Revision>>;

    /// Stores revision chains. Returning `Ok` means they are durable.
    fn insert_histories(
        &self,
        histories: &[(String, Vec<Revision>)],
    ) -> ReplicationResult<InsertOutcome>;
}

/// A peer backed by a [`Datastore`] in this process.
#[derive(Debug, Clone)]
pub struct DatastorePeer {
    datastore: Arc<Datastore>,
}

impl DatastorePeer {
    /// Wraps a datastore.
    pub fn new(datastore: Arc<Datastore>) -> Self {
        Self { datastore }
    }

    /// Returns the wrapped datastore.
    pub fn datastore(&self) -> &Arc<Datastore> {
        &self.datastore
    }
}

impl ReplicationPeer for DatastorePeer {
    fn identifier(&self) -> String {
        self.datastore.identifier()
    }

    fn last_sequence(&self) -> ReplicationResult<Sequence> {
        Ok(self.datastore.last_sequence())
    }

    fn changes_since(&self, since: Sequence, limit: usize) -> ReplicationResult<Changes> {
        Ok(self.datastore.changes_since(since, Some(limit))?)
    }

    fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<RevisionId>>,
    ) -> ReplicationResult<BTreeMap<String, Vec<RevisionId>>> {
        Ok(self.datastore.revs_diff(revs)?)
    }

    fn history(&self, doc_id: &str, rev_id: &RevisionId) -> ReplicationResult<Vec<Revision>> {
        Ok(self.datastore.history(doc_id, rev_id)?)
    }

    fn insert_histories(
        &self,
        histories: &[(String, Vec<Revision>)],
    ) -> ReplicationResult<InsertOutcome> {
        Ok(self.datastore.insert_histories(histories)?)
    }
}
