//! Per-document revision trees.
//!
//! Every document owns a tree of revisions. Nodes live in an arena and
//! refer to their parent and children by index, so the tree can be walked
//! in either direction without reference cycles.
//!
//! A leaf is a node with no children. A document is conflicted when it has
//! two or more leaves that are not deletion tombstones. Exactly one leaf is
//! the winner:
//!
//! 1. non-deleted leaves beat deleted leaves
//! 2. then the highest generation wins
//! 3. then the greatest revision id wins
//!
//! Every replica applies the same rule to the same set of leaves, so all
//! replicas agree on the winner without talking to each other.

use crate::attachment::Attachments;
use crate::error::{CoreError, CoreResult};
use crate::revision::{Revision, RevisionId, Sequence};
use crate::value::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Node {
    rev_id: RevisionId,
    parent: Option<usize>,
    children: Vec<usize>,
    body: Value,
    attachments: Attachments,
    deleted: bool,
    sequence: Sequence,
}

/// The revision tree of one document.
#[derive(Debug, Clone)]
pub struct RevisionTree {
    doc_id: String,
    nodes: Vec<Node>,
    by_id: HashMap<RevisionId, usize>,
}

impl RevisionTree {
    /// Creates an empty tree for `doc_id`.
    #[must_use]
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            nodes: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Returns the document id.
    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Returns the number of revisions in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree holds no revisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the tree contains `rev_id`.
    #[must_use]
    pub fn contains(&self, rev_id: &RevisionId) -> bool {
        self.by_id.contains_key(rev_id)
    }

    /// Returns true if `rev_id` is in the tree and has no children.
    #[must_use]
    pub fn is_leaf(&self, rev_id: &RevisionId) -> bool {
        self.by_id
            .get(rev_id)
            .is_some_and(|&idx| self.nodes[idx].children.is_empty())
    }

    /// Adds a revision under `parent`.
    ///
    /// Returns `Ok(false)` without changing anything if the revision is
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the parent is missing from the tree or
    /// the generation is not one more than the parent's (1 for roots).
    pub fn insert(
        &mut self,
        rev_id: RevisionId,
        parent: Option<&RevisionId>,
        body: Value,
        deleted: bool,
        sequence: Sequence,
    ) -> CoreResult<bool> {
        self.insert_with_attachments(rev_id, parent, body, Attachments::new(), deleted, sequence)
    }

    /// Adds a revision that carries attachments. See [`RevisionTree::insert`].
    ///
    /// # Errors
    ///
    /// Same as [`RevisionTree::insert`].
    pub fn insert_with_attachments(
        &mut self,
        rev_id: RevisionId,
        parent: Option<&RevisionId>,
        body: Value,
        attachments: Attachments,
        deleted: bool,
        sequence: Sequence,
    ) -> CoreResult<bool> {
        if self.by_id.contains_key(&rev_id) {
            return Ok(false);
        }

        let (parent_idx, expected_generation) = match parent {
            Some(parent_id) => {
                let idx = *self.by_id.get(parent_id).ok_or_else(|| {
                    CoreError::invalid_argument(format!(
                        "parent {parent_id} of {rev_id} is not in the tree of {}",
                        self.doc_id
                    ))
                })?;
                (Some(idx), parent_id.generation() + 1)
            }
            None => (None, 1),
        };

        if rev_id.generation() != expected_generation {
            return Err(CoreError::invalid_argument(format!(
                "revision {rev_id} should have generation {expected_generation}"
            )));
        }

        let idx = self.nodes.len();
        self.nodes.push(Node {
            rev_id: rev_id.clone(),
            parent: parent_idx,
            children: Vec::new(),
            body,
            attachments,
            deleted,
            sequence,
        });
        if let Some(p) = parent_idx {
            self.nodes[p].children.push(idx);
        }
        self.by_id.insert(rev_id, idx);
        Ok(true)
    }

    fn leaf_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.children.is_empty())
            .map(|(i, _)| i)
    }

    fn winner_index(&self) -> Option<usize> {
        self.leaf_indices().max_by(|&a, &b| {
            let (a, b) = (&self.nodes[a], &self.nodes[b]);
            (!a.deleted)
                .cmp(&!b.deleted)
                .then_with(|| a.rev_id.cmp(&b.rev_id))
        })
    }

    fn materialize(&self, idx: usize, winner: Option<usize>) -> Revision {
        let node = &self.nodes[idx];
        Revision {
            doc_id: self.doc_id.clone(),
            rev_id: node.rev_id.clone(),
            parent: node.parent.map(|p| self.nodes[p].rev_id.clone()),
            body: node.body.clone(),
            deleted: node.deleted,
            sequence: node.sequence,
            current: winner == Some(idx),
            attachments: node.attachments.clone(),
        }
    }

    /// Returns the winning revision id.
    #[must_use]
    pub fn winner_id(&self) -> Option<&RevisionId> {
        self.winner_index().map(|idx| &self.nodes[idx].rev_id)
    }

    /// Returns the winning revision, which may be a tombstone.
    #[must_use]
    pub fn winner(&self) -> Option<Revision> {
        let winner = self.winner_index();
        winner.map(|idx| self.materialize(idx, winner))
    }

    /// Returns true if the winning revision is a tombstone.
    ///
    /// This is the case exactly when every leaf is deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.winner_index()
            .map_or(true, |idx| self.nodes[idx].deleted)
    }

    /// Returns the body of the winning revision if the document is live.
    #[must_use]
    pub fn live_body(&self) -> Option<&Value> {
        let idx = self.winner_index()?;
        let node = &self.nodes[idx];
        (!node.deleted).then_some(&node.body)
    }

    /// Returns any revision by id.
    #[must_use]
    pub fn get(&self, rev_id: &RevisionId) -> Option<Revision> {
        let idx = *self.by_id.get(rev_id)?;
        Some(self.materialize(idx, self.winner_index()))
    }

    /// Returns all leaf revision ids, sorted.
    #[must_use]
    pub fn leaf_ids(&self) -> Vec<RevisionId> {
        let mut ids: Vec<_> = self
            .leaf_indices()
            .map(|i| self.nodes[i].rev_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Returns the non-deleted leaves, winner first, then by revision id
    /// descending.
    #[must_use]
    pub fn live_leaves(&self) -> Vec<Revision> {
        let winner = self.winner_index();
        let mut leaves: Vec<_> = self
            .leaf_indices()
            .filter(|&i| !self.nodes[i].deleted)
            .map(|i| self.materialize(i, winner))
            .collect();
        leaves.sort_by(|a, b| b.current.cmp(&a.current).then_with(|| b.rev_id.cmp(&a.rev_id)));
        leaves
    }

    /// Returns true if two or more leaves are not deleted.
    #[must_use]
    pub fn is_conflicted(&self) -> bool {
        self.leaf_indices()
            .filter(|&i| !self.nodes[i].deleted)
            .nth(1)
            .is_some()
    }

    /// Returns the path from the root to `rev_id`, root first.
    ///
    /// # Errors
    ///
    /// Returns `RevisionNotFound` if the revision is not in the tree.
    pub fn history(&self, rev_id: &RevisionId) -> CoreResult<Vec<Revision>> {
        let mut idx = *self
            .by_id
            .get(rev_id)
            .ok_or_else(|| CoreError::revision_not_found(&self.doc_id, rev_id))?;
        let winner = self.winner_index();

        let mut path = vec![self.materialize(idx, winner)];
        while let Some(parent) = self.nodes[idx].parent {
            path.push(self.materialize(parent, winner));
            idx = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Returns the highest sequence stored in this tree.
    #[must_use]
    pub fn latest_sequence(&self) -> Sequence {
        self.nodes.iter().map(|n| n.sequence).max().unwrap_or(0)
    }

    /// Iterates over every revision in insertion order.
    pub fn revisions(&self) -> impl Iterator<Item = Revision> + '_ {
        let winner = self.winner_index();
        (0..self.nodes.len()).map(move |i| self.materialize(i, winner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(s: &str) -> RevisionId {
        s.parse().unwrap()
    }

    fn body(n: i64) -> Value {
        Value::object().with("n", n)
    }

    /// 1-a -> 2-b -> 3-c
    ///          \-> 3-d
    fn branched() -> RevisionTree {
        let mut tree = RevisionTree::new("doc");
        tree.insert(rev("1-a"), None, body(1), false, 1).unwrap();
        tree.insert(rev("2-b"), Some(&rev("1-a")), body(2), false, 2).unwrap();
        tree.insert(rev("3-c"), Some(&rev("2-b")), body(3), false, 3).unwrap();
        tree.insert(rev("3-d"), Some(&rev("2-b")), body(4), false, 4).unwrap();
        tree
    }

    #[test]
    fn linear_history() {
        let mut tree = RevisionTree::new("doc");
        tree.insert(rev("1-a"), None, body(1), false, 1).unwrap();
        tree.insert(rev("2-b"), Some(&rev("1-a")), body(2), false, 2).unwrap();

        assert_eq!(tree.winner_id(), Some(&rev("2-b")));
        assert!(!tree.is_conflicted());
        assert!(tree.is_leaf(&rev("2-b")));
        assert!(!tree.is_leaf(&rev("1-a")));

        let history = tree.history(&rev("2-b")).unwrap();
        let ids: Vec<_> = history.iter().map(|r| r.rev_id.to_string()).collect();
        assert_eq!(ids, ["1-a", "2-b"]);
        assert!(history[1].current);
        assert_eq!(history[1].parent, Some(rev("1-a")));
    }

    #[test]
    fn winner_breaks_ties_by_rev_id() {
        let tree = branched();
        assert!(tree.is_conflicted());
        assert_eq!(tree.winner_id(), Some(&rev("3-d")));

        let leaves = tree.live_leaves();
        assert_eq!(leaves.len(), 2);
        assert!(leaves[0].current);
        assert_eq!(leaves[0].rev_id, rev("3-d"));
        assert_eq!(leaves[1].rev_id, rev("3-c"));
    }

    #[test]
    fn live_leaf_beats_deeper_tombstone() {
        let mut tree = branched();
        tree.insert(rev("4-e"), Some(&rev("3-d")), Value::object(), true, 5)
            .unwrap();

        assert_eq!(tree.winner_id(), Some(&rev("3-c")));
        assert!(!tree.is_conflicted());
        assert!(!tree.is_deleted());
        assert_eq!(tree.live_body(), Some(&body(3)));
    }

    #[test]
    fn all_leaves_deleted_reads_as_deleted() {
        let mut tree = RevisionTree::new("doc");
        tree.insert(rev("1-a"), None, body(1), false, 1).unwrap();
        tree.insert(rev("2-b"), Some(&rev("1-a")), Value::object(), true, 2)
            .unwrap();

        assert!(tree.is_deleted());
        assert!(tree.live_body().is_none());
        assert_eq!(tree.winner().unwrap().rev_id, rev("2-b"));
    }

    #[test]
    fn insert_validates_parent_and_generation() {
        let mut tree = RevisionTree::new("doc");
        assert!(tree.insert(rev("2-a"), None, body(1), false, 1).is_err());
        tree.insert(rev("1-a"), None, body(1), false, 1).unwrap();
        assert!(tree
            .insert(rev("2-b"), Some(&rev("1-zzz")), body(2), false, 2)
            .is_err());
        assert!(tree
            .insert(rev("3-b"), Some(&rev("1-a")), body(2), false, 2)
            .is_err());
        assert!(!tree.insert(rev("1-a"), None, body(9), false, 3).unwrap());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn missing_revision_history() {
        let tree = branched();
        assert!(tree.history(&rev("9-x")).unwrap_err().is_not_found());
    }

    #[test]
    fn sequences_and_leaf_ids() {
        let tree = branched();
        assert_eq!(tree.latest_sequence(), 4);
        assert_eq!(tree.leaf_ids(), vec![rev("3-c"), rev("3-d")]);
        assert_eq!(tree.revisions().count(), 4);
    }
}
