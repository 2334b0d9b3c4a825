//! Revision identifiers and revision snapshots.

use crate::attachment::Attachments;
use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Position of a committed change in a datastore's change stream.
///
/// Sequences start at 1 and increase by one per stored revision.
pub type Sequence = u64;

/// Identifier of one revision of one document.
///
/// The text form is `<generation>-<suffix>`, for example
/// `3-9f1c0d2e4b6a48f09a2d7c1e5b3f8a60`. The generation is the revision's
/// depth in its tree (roots are generation 1). The suffix is a random
/// 32-digit hex string, so two replicas editing the same parent never mint
/// the same id.
///
/// Ordering is by generation, then by suffix. It is the tie-break used when
/// choosing a winning revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId {
    generation: u64,
    suffix: String,
}

impl RevisionId {
    /// Creates a root (generation 1) revision id.
    #[must_use]
    pub fn new_root() -> Self {
        Self::with_generation(1)
    }

    /// Creates a fresh id for a child of `parent`.
    #[must_use]
    pub fn child_of(parent: &RevisionId) -> Self {
        Self::with_generation(parent.generation + 1)
    }

    /// Creates an id from its parts.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the generation is zero or the suffix is
    /// empty or contains characters other than ASCII letters and digits.
    pub fn from_parts(generation: u64, suffix: impl Into<String>) -> CoreResult<Self> {
        let suffix = suffix.into();
        if generation == 0 {
            return Err(CoreError::invalid_argument(
                "revision generation must be at least 1",
            ));
        }
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CoreError::invalid_argument(format!(
                "invalid revision suffix: {suffix:?}"
            )));
        }
        Ok(Self { generation, suffix })
    }

    fn with_generation(generation: u64) -> Self {
        Self {
            generation,
            suffix: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Returns the generation (tree depth, starting at 1).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the random suffix.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl PartialOrd for RevisionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RevisionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.suffix.cmp(&other.suffix))
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.suffix)
    }
}

impl FromStr for RevisionId {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let (generation, suffix) = s
            .split_once('-')
            .ok_or_else(|| CoreError::invalid_argument(format!("malformed revision id: {s:?}")))?;
        let generation = generation
            .parse::<u64>()
            .map_err(|_| CoreError::invalid_argument(format!("malformed revision id: {s:?}")))?;
        Self::from_parts(generation, suffix)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = CoreError;

    fn try_from(s: String) -> CoreResult<Self> {
        s.parse()
    }
}

impl From<RevisionId> for String {
    fn from(id: RevisionId) -> Self {
        id.to_string()
    }
}

/// An immutable snapshot of one revision of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// The document this revision belongs to.
    pub doc_id: String,
    /// This revision's id.
    pub rev_id: RevisionId,
    /// The parent revision, `None` for roots.
    pub parent: Option<RevisionId>,
    /// The document body. Always an object; empty for tombstones.
    pub body: Value,
    /// True if this revision is a deletion tombstone.
    pub deleted: bool,
    /// Sequence at which this revision was stored locally.
    pub sequence: Sequence,
    /// True if this revision is the document's winning revision.
    pub current: bool,
    /// Attachments stored with this revision. Empty for tombstones.
    #[serde(default, skip_serializing_if = "Attachments::is_empty")]
    pub attachments: Attachments,
}

impl Revision {
    /// Returns the revision's generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.rev_id.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_round_trip() {
        let id = RevisionId::new_root();
        assert_eq!(id.generation(), 1);
        assert_eq!(id.suffix().len(), 32);

        let parsed: RevisionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn child_increments_generation() {
        let root = RevisionId::new_root();
        let child = RevisionId::child_of(&root);
        assert_eq!(child.generation(), 2);
        assert_ne!(child.suffix(), root.suffix());
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "abc", "0-abc", "x-abc", "1-", "1-ab-cd", "-1-abc", "1-a b"] {
            assert!(bad.parse::<RevisionId>().is_err(), "{bad}");
        }
    }

    #[test]
    fn ordering_by_generation_then_suffix() {
        let a: RevisionId = "2-aaa".parse().unwrap();
        let b: RevisionId = "2-bbb".parse().unwrap();
        let c: RevisionId = "10-aaa".parse().unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn serde_uses_text_form() {
        let id: RevisionId = "3-abc".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""3-abc""#);
        let back: RevisionId = serde_json::from_str(r#""3-abc""#).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<RevisionId>(r#""bogus""#).is_err());
    }
}
