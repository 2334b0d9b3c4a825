//! Lazily loaded query results.

use crate::datastore::DatastoreState;
use crate::query::QueryPlan;
use crate::revision::{Revision, RevisionId};
use parking_lot::RwLock;
use std::sync::Arc;

/// The outcome of [`crate::Datastore::find`].
///
/// The matching document ids and their winning revision ids are fixed when
/// the query runs; bodies are loaded from the datastore as the result is
/// iterated. Because stored revisions never change, later writes to the
/// datastore do not affect a result that has already been produced, and
/// iterating twice yields the same revisions.
pub struct QueryResult {
    state: Arc<RwLock<DatastoreState>>,
    hits: Arc<[(String, RevisionId)]>,
    fields: Option<Arc<[String]>>,
    plan: QueryPlan,
}

impl QueryResult {
    pub(crate) fn new(
        state: Arc<RwLock<DatastoreState>>,
        hits: Vec<(String, RevisionId)>,
        fields: Option<Vec<String>>,
        plan: QueryPlan,
    ) -> Self {
        Self {
            state,
            hits: hits.into(),
            fields: fields.map(Into::into),
            plan,
        }
    }

    /// Returns the number of matching documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Returns the matching document ids in result order.
    #[must_use]
    pub fn document_ids(&self) -> Vec<String> {
        self.hits.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Returns the access path the query used.
    #[must_use]
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Iterates over the matching revisions, loading each on demand.
    #[must_use]
    pub fn iter(&self) -> QueryIter<'_> {
        QueryIter {
            result: self,
            position: 0,
        }
    }

    fn load(&self, index: usize) -> Option<Revision> {
        let (doc_id, rev_id) = &self.hits[index];
        let state = self.state.read();
        let mut revision = state.store.get_revision(doc_id, rev_id).ok()?;
        if let Some(fields) = &self.fields {
            revision.body = revision.body.project(fields);
        }
        Some(revision)
    }
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("hits", &self.hits.len())
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = Revision;
    type IntoIter = QueryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`QueryResult`].
#[derive(Debug)]
pub struct QueryIter<'a> {
    result: &'a QueryResult,
    position: usize,
}

impl Iterator for QueryIter<'_> {
    type Item = Revision;

    fn next(&mut self) -> Option<Revision> {
        while self.position < self.result.hits.len() {
            let index = self.position;
            self.position += 1;
            if let Some(revision) = self.result.load(index) {
                return Some(revision);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.result.hits.len() - self.position))
    }
}
