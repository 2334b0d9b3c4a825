//! Conflict resolution.
//!
//! A conflicted document has several live leaves. Resolving it leaves
//! exactly one: every losing leaf gets a tombstone child, and depending on
//! the [`Resolution`] the chosen leaf either stays as is or gets a merged
//! child. All new revisions are written as one log group.

use crate::attachment::{validate_attachments, Attachments};
use crate::error::{CoreError, CoreResult};
use crate::revision::{Revision, RevisionId};
use crate::store::{validate_body, StagedRevision};
use crate::tree::RevisionTree;
use crate::value::Value;

/// How a conflicted document should be resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep this live leaf and delete every other live leaf.
    PickWinner(RevisionId),
    /// Delete every live leaf except the current winner, then store this
    /// body as a child of the winner. The winner's attachments carry over.
    Merge(Value),
    /// Like `Merge`, with an explicit attachment set for the merged child.
    MergeWithAttachments {
        /// The merged body.
        body: Value,
        /// Every attachment of the merged revision.
        attachments: Attachments,
    },
}

/// Chooses a resolution for a conflicted document.
///
/// `conflicts` holds every live leaf, current winner first. Returning
/// `None` leaves the document conflicted.
pub trait ConflictResolver {
    /// Picks a resolution, or `None` to skip the document.
    fn resolve(&self, doc_id: &str, conflicts: &[Revision]) -> Option<Resolution>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&str, &[Revision]) -> Option<Resolution>,
{
    fn resolve(&self, doc_id: &str, conflicts: &[Revision]) -> Option<Resolution> {
        self(doc_id, conflicts)
    }
}

/// Resolves every conflict in favour of the current winner.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepCurrent;

impl ConflictResolver for KeepCurrent {
    fn resolve(&self, _doc_id: &str, conflicts: &[Revision]) -> Option<Resolution> {
        conflicts
            .first()
            .map(|winner| Resolution::PickWinner(winner.rev_id.clone()))
    }
}

/// Stages the revisions that carry out `resolution` on `tree`.
pub(crate) fn stage_resolution(
    tree: &RevisionTree,
    resolution: &Resolution,
) -> CoreResult<Vec<StagedRevision>> {
    let leaves = tree.live_leaves();

    let (keep, merged) = match resolution {
        Resolution::PickWinner(rev_id) => {
            if !leaves.iter().any(|leaf| leaf.rev_id == *rev_id) {
                return Err(CoreError::invalid_argument(format!(
                    "{rev_id} is not a live leaf of {}",
                    tree.doc_id()
                )));
            }
            (rev_id.clone(), None)
        }
        Resolution::Merge(body) => {
            validate_body(body)?;
            let winner = leaves
                .first()
                .ok_or_else(|| CoreError::document_not_found(tree.doc_id()))?;
            (
                winner.rev_id.clone(),
                Some((body.clone(), winner.attachments.clone())),
            )
        }
        Resolution::MergeWithAttachments { body, attachments } => {
            validate_body(body)?;
            validate_attachments(attachments)?;
            let winner = leaves
                .first()
                .ok_or_else(|| CoreError::document_not_found(tree.doc_id()))?;
            (winner.rev_id.clone(), Some((body.clone(), attachments.clone())))
        }
    };

    let mut staged: Vec<StagedRevision> = leaves
        .iter()
        .filter(|leaf| leaf.rev_id != keep)
        .map(|leaf| StagedRevision {
            doc_id: tree.doc_id().to_string(),
            rev_id: RevisionId::child_of(&leaf.rev_id),
            parent: Some(leaf.rev_id.clone()),
            body: Value::object(),
            attachments: Attachments::new(),
            deleted: true,
        })
        .collect();

    if let Some((body, attachments)) = merged {
        staged.push(StagedRevision {
            doc_id: tree.doc_id().to_string(),
            rev_id: RevisionId::child_of(&keep),
            parent: Some(keep),
            body,
            attachments,
            deleted: false,
        });
    }

    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(s: &str) -> RevisionId {
        s.parse().unwrap()
    }

    fn conflicted() -> RevisionTree {
        let mut tree = RevisionTree::new("doc");
        tree.insert(rev("1-a"), None, Value::object(), false, 1).unwrap();
        tree.insert(rev("2-b"), Some(&rev("1-a")), Value::object().with("v", "b"), false, 2)
            .unwrap();
        tree.insert(rev("2-c"), Some(&rev("1-a")), Value::object().with("v", "c"), false, 3)
            .unwrap();
        tree.insert(rev("2-d"), Some(&rev("1-a")), Value::object().with("v", "d"), false, 4)
            .unwrap();
        tree
    }

    fn apply(tree: &mut RevisionTree, staged: Vec<StagedRevision>) {
        for (i, s) in staged.into_iter().enumerate() {
            tree.insert_with_attachments(
                s.rev_id,
                s.parent.as_ref(),
                s.body,
                s.attachments,
                s.deleted,
                10 + i as u64,
            )
            .unwrap();
        }
    }

    #[test]
    fn pick_winner_tombstones_the_rest() {
        let mut tree = conflicted();
        let staged = stage_resolution(&tree, &Resolution::PickWinner(rev("2-b"))).unwrap();
        assert_eq!(staged.len(), 2);
        assert!(staged.iter().all(|s| s.deleted));

        apply(&mut tree, staged);
        assert!(!tree.is_conflicted());
        assert_eq!(tree.winner_id(), Some(&rev("2-b")));
    }

    #[test]
    fn merge_extends_the_winner() {
        let mut tree = conflicted();
        let merged = Value::object().with("v", "merged");
        let staged = stage_resolution(&tree, &Resolution::Merge(merged.clone())).unwrap();
        assert_eq!(staged.len(), 3);

        apply(&mut tree, staged);
        let winner = tree.winner().unwrap();
        assert_eq!(winner.parent, Some(rev("2-d")));
        assert_eq!(winner.body, merged);
        assert!(!tree.is_conflicted());
    }

    #[test]
    fn merges_keep_or_replace_the_winners_attachments() {
        use crate::attachment::Attachment;

        let mut photo = Attachments::new();
        photo.insert("photo.png".into(), Attachment::new("image/png", vec![1, 2]));
        let mut tree = RevisionTree::new("doc");
        tree.insert(rev("1-a"), None, Value::object(), false, 1).unwrap();
        tree.insert(rev("2-b"), Some(&rev("1-a")), Value::object(), false, 2)
            .unwrap();
        tree.insert_with_attachments(
            rev("2-c"),
            Some(&rev("1-a")),
            Value::object(),
            photo.clone(),
            false,
            3,
        )
        .unwrap();

        let kept = stage_resolution(&tree, &Resolution::Merge(Value::object())).unwrap();
        let child = kept.iter().find(|s| !s.deleted).unwrap();
        assert_eq!(child.attachments, photo);
        assert!(kept.iter().filter(|s| s.deleted).all(|s| s.attachments.is_empty()));

        let replaced = Resolution::MergeWithAttachments {
            body: Value::object().with("v", "both"),
            attachments: Attachments::new(),
        };
        let staged = stage_resolution(&tree, &replaced).unwrap();
        apply(&mut tree, staged);
        let winner = tree.winner().unwrap();
        assert!(winner.attachments.is_empty());
        assert_eq!(winner.parent, Some(rev("2-c")));
    }

    #[test]
    fn pick_winner_rejects_non_leaves() {
        let tree = conflicted();
        for bad in ["1-a", "9-zz"] {
            let err = stage_resolution(&tree, &Resolution::PickWinner(rev(bad))).unwrap_err();
            assert!(matches!(err, CoreError::InvalidArgument { .. }));
        }
    }

    #[test]
    fn closures_and_keep_current_are_resolvers() {
        let tree = conflicted();
        let leaves = tree.live_leaves();

        assert_eq!(
            KeepCurrent.resolve("doc", &leaves),
            Some(Resolution::PickWinner(rev("2-d")))
        );

        let skip = |_: &str, _: &[Revision]| -> Option<Resolution> { None };
        assert!(skip.resolve("doc", &leaves).is_none());
    }
}
