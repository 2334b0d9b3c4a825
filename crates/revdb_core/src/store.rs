//! In-memory revision state of one datastore.
//!
//! The store owns every document's revision tree plus the change index
//! (latest sequence per document). It performs no I/O: writes are first
//! *staged* against the current state, which validates them and picks
//! revision ids, then numbered, logged by the datastore, and finally
//! *applied*. Replay feeds logged records straight into [`RevisionStore::apply`].

use crate::attachment::{validate_attachments, Attachments};
use crate::error::{CoreError, CoreResult};
use crate::log::RevisionRecord;
use crate::revision::{Revision, RevisionId, Sequence};
use crate::tree::RevisionTree;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Body fields reserved for the host representation of a document.
pub(crate) const RESERVED_FIELDS: [&str; 4] = ["_id", "_rev", "_deleted", "_attachments"];

/// A validated revision waiting for a sequence number.
#[derive(Debug, Clone)]
pub(crate) struct StagedRevision {
    pub doc_id: String,
    pub rev_id: RevisionId,
    pub parent: Option<RevisionId>,
    pub body: Value,
    pub attachments: Attachments,
    pub deleted: bool,
}

/// One document in a change listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Latest local sequence touching the document.
    pub sequence: Sequence,
    /// The document.
    pub doc_id: String,
    /// Every leaf of the document's tree, sorted.
    pub leaves: Vec<RevisionId>,
    /// True if the document currently reads as deleted.
    pub deleted: bool,
}

/// A page of changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Changes {
    /// Changed documents ordered by sequence.
    pub entries: Vec<ChangeEntry>,
    /// Sequence to pass to the next call.
    pub last_sequence: Sequence,
}

#[derive(Debug, Default)]
pub(crate) struct RevisionStore {
    trees: BTreeMap<String, RevisionTree>,
    by_sequence: BTreeMap<Sequence, String>,
    doc_sequence: HashMap<String, Sequence>,
    last_sequence: Sequence,
    revision_count: usize,
}

impl RevisionStore {
    pub(crate) fn tree(&self, doc_id: &str) -> Option<&RevisionTree> {
        self.trees.get(doc_id)
    }

    pub(crate) fn trees(&self) -> impl Iterator<Item = &RevisionTree> {
        self.trees.values()
    }

    pub(crate) fn last_sequence(&self) -> Sequence {
        self.last_sequence
    }

    pub(crate) fn revision_count(&self) -> usize {
        self.revision_count
    }

    pub(crate) fn get_current(&self, doc_id: &str) -> CoreResult<Revision> {
        self.trees
            .get(doc_id)
            .filter(|tree| !tree.is_deleted())
            .and_then(RevisionTree::winner)
            .ok_or_else(|| CoreError::document_not_found(doc_id))
    }

    pub(crate) fn get_revision(&self, doc_id: &str, rev_id: &RevisionId) -> CoreResult<Revision> {
        let tree = self
            .trees
            .get(doc_id)
            .ok_or_else(|| CoreError::document_not_found(doc_id))?;
        tree.get(rev_id)
            .ok_or_else(|| CoreError::revision_not_found(doc_id, rev_id))
    }

    pub(crate) fn stage_save(
        &self,
        doc_id: Option<&str>,
        parent: Option<&RevisionId>,
        body: Value,
        attachments: Attachments,
        deleted: bool,
    ) -> CoreResult<StagedRevision> {
        let (body, attachments) = if deleted {
            (Value::object(), Attachments::new())
        } else {
            (body, attachments)
        };
        validate_body(&body)?;
        validate_attachments(&attachments)?;

        let doc_id = match doc_id {
            Some(id) => {
                validate_doc_id(id)?;
                id.to_string()
            }
            None if parent.is_some() => {
                return Err(CoreError::invalid_argument(
                    "a parent revision requires a document id",
                ));
            }
            None => Uuid::new_v4().simple().to_string(),
        };

        let Some(tree) = self.trees.get(&doc_id) else {
            if let Some(parent) = parent {
                return Err(CoreError::conflict(
                    &doc_id,
                    format!("parent {parent} does not exist"),
                ));
            }
            if deleted {
                return Err(CoreError::document_not_found(&doc_id));
            }
            return Ok(StagedRevision {
                rev_id: RevisionId::new_root(),
                doc_id,
                parent: None,
                body,
                attachments,
                deleted,
            });
        };

        let parent = match parent {
            Some(parent) => {
                check_tip(tree, parent)?;
                parent.clone()
            }
            None if tree.is_deleted() => match tree.winner_id() {
                Some(tombstone) => tombstone.clone(),
                None => return Err(CoreError::consistency(format!("empty tree for {doc_id}"))),
            },
            None => {
                return Err(CoreError::conflict(
                    &doc_id,
                    "document exists; a parent revision is required",
                ));
            }
        };

        if deleted && tree.is_deleted() {
            return Err(CoreError::conflict(&doc_id, "document is already deleted"));
        }

        Ok(StagedRevision {
            rev_id: RevisionId::child_of(&parent),
            doc_id,
            parent: Some(parent),
            body,
            attachments,
            deleted,
        })
    }

    pub(crate) fn stage_delete(&self, doc_id: &str, rev_id: &RevisionId) -> CoreResult<StagedRevision> {
        let tree = self
            .trees
            .get(doc_id)
            .ok_or_else(|| CoreError::document_not_found(doc_id))?;
        if tree.is_deleted() {
            return Err(CoreError::conflict(doc_id, "document is already deleted"));
        }
        check_tip(tree, rev_id)?;
        if tree.get(rev_id).is_some_and(|r| r.deleted) {
            return Err(CoreError::conflict(
                doc_id,
                format!("revision {rev_id} is already deleted"),
            ));
        }

        Ok(StagedRevision {
            doc_id: doc_id.to_string(),
            rev_id: RevisionId::child_of(rev_id),
            parent: Some(rev_id.clone()),
            body: Value::object(),
            attachments: Attachments::new(),
            deleted: true,
        })
    }

    /// Stages revision histories coming from another replica.
    ///
    /// Each history runs root first. Revisions already present, locally or
    /// earlier in the same call, are skipped.
    pub(crate) fn stage_histories(
        &self,
        histories: &[(String, Vec<Revision>)],
    ) -> CoreResult<Vec<StagedRevision>> {
        let mut staged = Vec::new();
        let mut seen: HashSet<(String, RevisionId)> = HashSet::new();

        for (doc_id, history) in histories {
            validate_doc_id(doc_id)?;
            let Some(first) = history.first() else {
                return Err(CoreError::invalid_argument(format!(
                    "empty history for {doc_id}"
                )));
            };

            let tree = self.trees.get(doc_id.as_str());
            let known = |rev: &RevisionId, seen: &HashSet<(String, RevisionId)>| {
                tree.is_some_and(|t| t.contains(rev)) || seen.contains(&(doc_id.clone(), rev.clone()))
            };

            if let Some(root_parent) = &first.parent {
                if !known(root_parent, &seen) {
                    return Err(CoreError::invalid_argument(format!(
                        "history of {doc_id} starts at {} whose parent {root_parent} is unknown",
                        first.rev_id
                    )));
                }
            }

            for (i, rev) in history.iter().enumerate() {
                if rev.doc_id != *doc_id {
                    return Err(CoreError::invalid_argument(format!(
                        "revision {} belongs to {}, not {doc_id}",
                        rev.rev_id, rev.doc_id
                    )));
                }
                let expected_generation = rev.parent.as_ref().map_or(1, |p| p.generation() + 1);
                if rev.rev_id.generation() != expected_generation {
                    return Err(CoreError::invalid_argument(format!(
                        "revision {} does not follow its parent",
                        rev.rev_id
                    )));
                }
                if i > 0 && rev.parent.as_ref() != Some(&history[i - 1].rev_id) {
                    return Err(CoreError::invalid_argument(format!(
                        "history of {doc_id} is not a parent chain at {}",
                        rev.rev_id
                    )));
                }
                if known(&rev.rev_id, &seen) {
                    continue;
                }
                validate_body(&rev.body)?;
                validate_attachments(&rev.attachments)?;
                seen.insert((doc_id.clone(), rev.rev_id.clone()));
                staged.push(StagedRevision {
                    doc_id: doc_id.clone(),
                    rev_id: rev.rev_id.clone(),
                    parent: rev.parent.clone(),
                    body: if rev.deleted {
                        Value::object()
                    } else {
                        rev.body.clone()
                    },
                    attachments: if rev.deleted {
                        Attachments::new()
                    } else {
                        rev.attachments.clone()
                    },
                    deleted: rev.deleted,
                });
            }
        }

        Ok(staged)
    }

    /// Numbers staged revisions with the next free sequences.
    pub(crate) fn assign_sequences(&self, staged: Vec<StagedRevision>) -> Vec<RevisionRecord> {
        staged
            .into_iter()
            .zip(self.last_sequence + 1..)
            .map(|(s, sequence)| RevisionRecord {
                doc_id: s.doc_id,
                rev_id: s.rev_id,
                parent: s.parent,
                body: s.body,
                deleted: s.deleted,
                sequence,
                attachments: s.attachments,
            })
            .collect()
    }

    /// Inserts a numbered revision. Returns false if it was already present.
    pub(crate) fn apply(&mut self, record: &RevisionRecord) -> CoreResult<bool> {
        let tree = self
            .trees
            .entry(record.doc_id.clone())
            .or_insert_with(|| RevisionTree::new(record.doc_id.clone()));

        let inserted = tree.insert_with_attachments(
            record.rev_id.clone(),
            record.parent.as_ref(),
            record.body.clone(),
            record.attachments.clone(),
            record.deleted,
            record.sequence,
        );
        let inserted = match inserted {
            Ok(inserted) => inserted,
            Err(err) => {
                if tree.is_empty() {
                    self.trees.remove(&record.doc_id);
                }
                return Err(err);
            }
        };
        if !inserted {
            return Ok(false);
        }

        self.revision_count += 1;
        self.last_sequence = self.last_sequence.max(record.sequence);

        let previous = self.doc_sequence.get(&record.doc_id).copied();
        if previous.map_or(true, |p| record.sequence > p) {
            if let Some(p) = previous {
                self.by_sequence.remove(&p);
            }
            self.by_sequence
                .insert(record.sequence, record.doc_id.clone());
            self.doc_sequence
                .insert(record.doc_id.clone(), record.sequence);
        }
        Ok(true)
    }

    pub(crate) fn changes_since(&self, since: Sequence, limit: usize) -> Changes {
        let entries: Vec<ChangeEntry> = self
            .by_sequence
            .range(since + 1..)
            .take(limit)
            .filter_map(|(&sequence, doc_id)| {
                let tree = self.trees.get(doc_id)?;
                Some(ChangeEntry {
                    sequence,
                    doc_id: doc_id.clone(),
                    leaves: tree.leaf_ids(),
                    deleted: tree.is_deleted(),
                })
            })
            .collect();
        let last_sequence = entries.last().map_or(since, |e| e.sequence);
        Changes {
            entries,
            last_sequence,
        }
    }

    pub(crate) fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<RevisionId>>,
    ) -> BTreeMap<String, Vec<RevisionId>> {
        revs.iter()
            .filter_map(|(doc_id, ids)| {
                let tree = self.trees.get(doc_id);
                let missing: Vec<RevisionId> = ids
                    .iter()
                    .filter(|id| !tree.is_some_and(|t| t.contains(id)))
                    .cloned()
                    .collect();
                (!missing.is_empty()).then(|| (doc_id.clone(), missing))
            })
            .collect()
    }

    pub(crate) fn conflicted_ids(&self) -> Vec<String> {
        self.trees
            .values()
            .filter(|t| t.is_conflicted())
            .map(|t| t.doc_id().to_string())
            .collect()
    }

    pub(crate) fn document_ids(&self, include_deleted: bool) -> Vec<String> {
        self.trees
            .values()
            .filter(|t| include_deleted || !t.is_deleted())
            .map(|t| t.doc_id().to_string())
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.trees.values().filter(|t| !t.is_deleted()).count()
    }

    pub(crate) fn document_total(&self) -> usize {
        self.trees.len()
    }
}

/// Local writes may only extend the current winner. Other leaves are
/// reached through conflict resolution.
pub(crate) fn check_tip(tree: &RevisionTree, rev_id: &RevisionId) -> CoreResult<()> {
    if !tree.contains(rev_id) {
        return Err(CoreError::conflict(
            tree.doc_id(),
            format!("revision {rev_id} does not exist"),
        ));
    }
    match tree.winner_id() {
        Some(winner) if winner == rev_id => Ok(()),
        Some(winner) => Err(CoreError::conflict(
            tree.doc_id(),
            format!("revision {rev_id} is not the current revision (current is {winner})"),
        )),
        None => Err(CoreError::consistency(format!(
            "empty tree for {}",
            tree.doc_id()
        ))),
    }
}

pub(crate) fn validate_doc_id(doc_id: &str) -> CoreResult<()> {
    if doc_id.is_empty() {
        return Err(CoreError::invalid_argument("document id must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_body(body: &Value) -> CoreResult<()> {
    let Some(pairs) = body.as_object() else {
        return Err(CoreError::invalid_argument(format!(
            "document body must be an object, got {}",
            body.type_name()
        )));
    };
    if let Some((key, _)) = pairs
        .iter()
        .find(|(k, _)| RESERVED_FIELDS.contains(&k.as_str()))
    {
        return Err(CoreError::invalid_argument(format!(
            "reserved field {key} in document body"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(store: &mut RevisionStore, staged: Vec<StagedRevision>) -> Vec<RevisionRecord> {
        let records = store.assign_sequences(staged);
        for record in &records {
            store.apply(record).unwrap();
        }
        records
    }

    fn save(store: &mut RevisionStore, doc: &str, parent: Option<&RevisionId>, n: i64) -> RevisionId {
        let staged = store
            .stage_save(Some(doc), parent, Value::object().with("n", n), Attachments::new(), false)
            .unwrap();
        commit(store, vec![staged]).remove(0).rev_id
    }

    #[test]
    fn create_update_and_read() {
        let mut store = RevisionStore::default();
        let r1 = save(&mut store, "a", None, 1);
        let r2 = save(&mut store, "a", Some(&r1), 2);

        let current = store.get_current("a").unwrap();
        assert_eq!(current.rev_id, r2);
        assert_eq!(current.sequence, 2);
        assert!(current.current);
        assert!(!store.get_revision("a", &r1).unwrap().current);
        assert_eq!(store.last_sequence(), 2);
    }

    #[test]
    fn stale_and_unknown_parents_conflict() {
        let mut store = RevisionStore::default();
        let r1 = save(&mut store, "a", None, 1);
        save(&mut store, "a", Some(&r1), 2);

        let stale = store.stage_save(Some("a"), Some(&r1), Value::object(), Attachments::new(), false);
        assert!(matches!(stale, Err(CoreError::Conflict { .. })));

        let unknown: RevisionId = "1-nothere".parse().unwrap();
        let err = store.stage_save(Some("a"), Some(&unknown), Value::object(), Attachments::new(), false);
        assert!(matches!(err, Err(CoreError::Conflict { .. })));

        let err = store.stage_save(Some("a"), None, Value::object(), Attachments::new(), false);
        assert!(matches!(err, Err(CoreError::Conflict { .. })));
    }

    #[test]
    fn only_the_winner_can_be_extended() {
        let mut store = RevisionStore::default();
        let r1 = save(&mut store, "a", None, 1);
        let low: RevisionId = "2-0000".parse().unwrap();
        let high: RevisionId = "2-ffff".parse().unwrap();
        for (rev, n) in [(&low, 2), (&high, 3)] {
            let staged = StagedRevision {
                doc_id: "a".into(),
                rev_id: rev.clone(),
                parent: Some(r1.clone()),
                body: Value::object().with("n", n),
                attachments: Attachments::new(),
                deleted: false,
            };
            commit(&mut store, vec![staged]);
        }

        let err = store.stage_save(Some("a"), Some(&low), Value::object(), Attachments::new(), false);
        assert!(matches!(err, Err(CoreError::Conflict { .. })));
        assert!(matches!(store.stage_delete("a", &low), Err(CoreError::Conflict { .. })));

        let tomb = StagedRevision {
            doc_id: "a".into(),
            rev_id: RevisionId::child_of(&low),
            parent: Some(low.clone()),
            body: Value::object(),
            attachments: Attachments::new(),
            deleted: true,
        };
        let tomb = commit(&mut store, vec![tomb]).remove(0).rev_id;
        assert!(!store.tree("a").unwrap().is_conflicted());

        let err = store.stage_save(Some("a"), Some(&tomb), Value::object(), Attachments::new(), false);
        assert!(matches!(err, Err(CoreError::Conflict { .. })));
        assert!(matches!(store.stage_delete("a", &tomb), Err(CoreError::Conflict { .. })));

        let next = store.stage_save(Some("a"), Some(&high), Value::object(), Attachments::new(), false).unwrap();
        assert_eq!(next.parent, Some(high));
    }

    #[test]
    fn generated_ids_and_body_validation() {
        let store = RevisionStore::default();
        let staged = store.stage_save(None, None, Value::object(), Attachments::new(), false).unwrap();
        assert_eq!(staged.doc_id.len(), 32);

        assert!(store
            .stage_save(Some("a"), None, Value::from(3), Attachments::new(), false)
            .is_err());
        assert!(store
            .stage_save(Some("a"), None, Value::object().with("_id", "x"), Attachments::new(), false)
            .is_err());
        assert!(store.stage_save(Some(""), None, Value::object(), Attachments::new(), false).is_err());
    }

    #[test]
    fn delete_then_recreate_extends_tombstone() {
        let mut store = RevisionStore::default();
        let r1 = save(&mut store, "a", None, 1);
        let tomb = store.stage_delete("a", &r1).unwrap();
        let tomb = commit(&mut store, vec![tomb]).remove(0);
        assert!(tomb.deleted);
        assert!(store.get_current("a").unwrap_err().is_not_found());
        assert!(matches!(
            store.stage_delete("a", &tomb.rev_id),
            Err(CoreError::Conflict { .. })
        ));

        let r3 = save(&mut store, "a", None, 3);
        assert_eq!(r3.generation(), 3);
        assert_eq!(store.get_current("a").unwrap().rev_id, r3);
        assert!(store.stage_delete("zzz", &r1).unwrap_err().is_not_found());
    }

    #[test]
    fn changes_track_latest_sequence_per_document() {
        let mut store = RevisionStore::default();
        let a1 = save(&mut store, "a", None, 1);
        save(&mut store, "b", None, 1);
        save(&mut store, "a", Some(&a1), 2);

        let changes = store.changes_since(0, 10);
        let docs: Vec<_> = changes.entries.iter().map(|e| (e.doc_id.as_str(), e.sequence)).collect();
        assert_eq!(docs, [("b", 2), ("a", 3)]);
        assert_eq!(changes.last_sequence, 3);

        let page = store.changes_since(0, 1);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.last_sequence, 2);
        assert!(store.changes_since(3, 10).entries.is_empty());
        assert_eq!(store.changes_since(3, 10).last_sequence, 3);
    }

    #[test]
    fn histories_skip_known_revisions_and_branch() {
        let mut store = RevisionStore::default();
        let r1 = save(&mut store, "a", None, 1);
        let local = save(&mut store, "a", Some(&r1), 2);

        let remote_rev = RevisionId::child_of(&r1);
        let history = vec![
            store.get_revision("a", &r1).unwrap(),
            Revision {
                doc_id: "a".into(),
                rev_id: remote_rev.clone(),
                parent: Some(r1.clone()),
                body: Value::object().with("n", 9),
                deleted: false,
                sequence: 40,
                current: true,
                attachments: Attachments::new(),
            },
        ];
        let staged = store.stage_histories(&[("a".into(), history.clone())]).unwrap();
        assert_eq!(staged.len(), 1);
        commit(&mut store, staged);

        assert!(store.tree("a").unwrap().is_conflicted());
        assert_eq!(store.conflicted_ids(), ["a"]);
        assert!(store.tree("a").unwrap().contains(&local));
        assert!(store.stage_histories(&[("a".into(), history)]).unwrap().is_empty());
    }

    #[test]
    fn histories_must_be_parent_chains() {
        let store = RevisionStore::default();
        let r1 = RevisionId::new_root();
        let orphan = Revision {
            doc_id: "a".into(),
            rev_id: RevisionId::child_of(&r1),
            parent: Some(r1),
            body: Value::object(),
            deleted: false,
            sequence: 1,
            current: true,
            attachments: Attachments::new(),
        };
        assert!(store.stage_histories(&[("a".into(), vec![orphan])]).is_err());
        assert!(store.stage_histories(&[("a".into(), Vec::new())]).is_err());
    }

    #[test]
    fn revs_diff_reports_missing() {
        let mut store = RevisionStore::default();
        let r1 = save(&mut store, "a", None, 1);
        let other = RevisionId::new_root();

        let mut ask = BTreeMap::new();
        ask.insert("a".to_string(), vec![r1, other.clone()]);
        ask.insert("b".to_string(), vec![other.clone()]);

        let missing = store.revs_diff(&ask);
        assert_eq!(missing["a"], vec![other.clone()]);
        assert_eq!(missing["b"], vec![other]);
    }

    #[test]
    fn failed_apply_leaves_no_empty_tree() {
        let mut store = RevisionStore::default();
        let record = RevisionRecord {
            doc_id: "ghost".into(),
            rev_id: "2-abc".parse().unwrap(),
            parent: Some("1-abc".parse().unwrap()),
            body: Value::object(),
            deleted: false,
            sequence: 1,
            attachments: Attachments::new(),
        };
        assert!(store.apply(&record).is_err());
        assert!(store.tree("ghost").is_none());
        assert_eq!(store.last_sequence(), 0);
    }
}
