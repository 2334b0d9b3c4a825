//! Datastore fixtures and scenarios.

use revdb_core::{Config, Datastore, Revision, RevisionId, Value};
use revdb_storage::InMemoryBackend;
use std::path::Path;
use tempfile::TempDir;

/// Converts a `serde_json` value into a body.
pub fn body(json: serde_json::Value) -> Value {
    Value::from(json)
}

enum Storage {
    Memory(InMemoryBackend),
    File(TempDir),
}

/// A test datastore that can be reopened to exercise log replay.
pub struct TestDatastore {
    /// The open datastore.
    pub ds: Datastore,
    name: String,
    storage: Storage,
}

impl TestDatastore {
    /// Creates an in-memory datastore.
    pub fn memory(name: &str) -> Self {
        let backend = InMemoryBackend::new();
        let ds = Datastore::open_with_backend(name, Config::default(), Box::new(backend.share()))
            .expect("Failed to open in-memory datastore");
        Self {
            ds,
            name: name.to_string(),
            storage: Storage::Memory(backend),
        }
    }

    /// Creates a datastore in a temporary directory.
    pub fn file(name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ds = Datastore::open(&temp_dir.path().join(name), name, Config::default())
            .expect("Failed to open file datastore");
        Self {
            ds,
            name: name.to_string(),
            storage: Storage::File(temp_dir),
        }
    }

    /// Returns the datastore directory if file-based.
    pub fn path(&self) -> Option<std::path::PathBuf> {
        match &self.storage {
            Storage::File(dir) => Some(dir.path().join(&self.name)),
            Storage::Memory(_) => None,
        }
    }

    /// Drops the open handle and opens the datastore again from its log.
    pub fn reopen(self) -> Self {
        let Self { ds, name, storage } = self;
        drop(ds);
        let ds = match &storage {
            Storage::Memory(backend) => {
                Datastore::open_with_backend(&name, Config::default(), Box::new(backend.share()))
            }
            Storage::File(dir) => Datastore::open(&dir.path().join(&name), &name, Config::default()),
        }
        .expect("Failed to reopen datastore");
        Self { ds, name, storage }
    }
}

impl std::ops::Deref for TestDatastore {
    type Target = Datastore;

    fn deref(&self) -> &Self::Target {
        &self.ds
    }
}

/// Runs a test with a temporary in-memory datastore.
pub fn with_temp_datastore<F, R>(f: F) -> R
where
    F: FnOnce(&Datastore) -> R,
{
    let test_ds = TestDatastore::memory("test");
    f(&test_ds.ds)
}

/// Runs a test with a datastore in a temporary directory.
pub fn with_file_datastore<F, R>(f: F) -> R
where
    F: FnOnce(&Datastore, &Path) -> R,
{
    let test_ds = TestDatastore::file("test");
    let path = test_ds.path().expect("File datastore should have a path");
    f(&test_ds.ds, &path)
}

/// One stored revision reduced to what replicas must agree on.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionSnapshot {
    /// Document id.
    pub doc_id: String,
    /// Revision id.
    pub rev_id: RevisionId,
    /// Body.
    pub body: Value,
    /// Tombstone flag.
    pub deleted: bool,
}

/// Collects every revision reachable from a leaf, sorted by document and
/// revision id.
pub fn revision_set(ds: &Datastore) -> Vec<RevisionSnapshot> {
    let changes = ds
        .changes_since(0, Some(usize::MAX))
        .expect("Failed to list changes");
    let mut out: Vec<RevisionSnapshot> = Vec::new();
    for entry in changes.entries {
        for leaf in entry.leaves {
            let chain = ds
                .history(&entry.doc_id, &leaf)
                .expect("Leaf should have a history");
            out.extend(chain.into_iter().map(|r: Revision| RevisionSnapshot {
                doc_id: r.doc_id,
                rev_id: r.rev_id,
                body: r.body,
                deleted: r.deleted,
            }));
        }
    }
    out.sort_by(|a, b| (&a.doc_id, &a.rev_id).cmp(&(&b.doc_id, &b.rev_id)));
    out.dedup_by(|a, b| a.doc_id == b.doc_id && a.rev_id == b.rev_id);
    out
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a datastore with `count` documents `doc-0000..` whose bodies
    /// hold `{"n": i, "even": i % 2 == 0}`.
    pub fn populated(count: usize) -> TestDatastore {
        let test_ds = TestDatastore::memory("populated");
        for i in 0..count {
            let doc_id = format!("doc-{i:04}");
            let n = i64::try_from(i).expect("count fits in i64");
            test_ds
                .save(
                    Some(&doc_id),
                    None,
                    Value::object().with("n", n).with("even", i % 2 == 0),
                    false,
                )
                .expect("Failed to save document");
        }
        test_ds
    }

    /// Saves `doc_id` and then grafts a second live branch onto its root,
    /// the way a pull from a diverged replica would. Returns the two live
    /// leaves, local first.
    pub fn conflicted(ds: &Datastore, doc_id: &str) -> (Revision, Revision) {
        let root = ds
            .save(Some(doc_id), None, Value::object().with("v", "root"), false)
            .expect("Failed to save root");
        let local = ds
            .save(
                Some(doc_id),
                Some(&root.rev_id),
                Value::object().with("v", "local"),
                false,
            )
            .expect("Failed to save local edit");

        let remote_id = RevisionId::child_of(&root.rev_id);
        let remote = Revision {
            doc_id: doc_id.to_string(),
            rev_id: remote_id.clone(),
            parent: Some(root.rev_id.clone()),
            body: Value::object().with("v", "remote"),
            deleted: false,
            sequence: 0,
            current: false,
            attachments: Default::default(),
        };
        ds.insert_with_history(doc_id, vec![root, remote])
            .expect("Failed to graft remote branch");

        let remote = ds
            .get(doc_id, remote_id.into())
            .expect("Remote branch should exist");
        (local, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::RevisionSelector;
    use serde_json::json;

    #[test]
    fn memory_datastore_survives_reopen() {
        let test_ds = TestDatastore::memory("m");
        test_ds.save(Some("a"), None, body(json!({"x": 1})), false).unwrap();

        let test_ds = test_ds.reopen();
        let doc = test_ds.get("a", RevisionSelector::Current).unwrap();
        assert_eq!(doc.body, body(json!({"x": 1})));
    }

    #[test]
    fn file_datastore_survives_reopen() {
        let test_ds = TestDatastore::file("f");
        assert!(test_ds.path().unwrap().join("revisions.log").exists());
        test_ds.save(Some("a"), None, Value::object(), false).unwrap();
        assert_eq!(test_ds.reopen().document_count().unwrap(), 1);
    }

    #[test]
    fn populated_scenario() {
        let test_ds = scenarios::populated(10);
        assert_eq!(test_ds.document_count().unwrap(), 10);
        assert_eq!(test_ds.last_sequence(), 10);
        assert_eq!(revision_set(&test_ds).len(), 10);
    }

    #[test]
    fn conflicted_scenario() {
        with_temp_datastore(|ds| {
            let (local, remote) = scenarios::conflicted(ds, "c");
            assert_ne!(local.rev_id, remote.rev_id);
            assert_eq!(ds.conflicted_document_ids().unwrap(), ["c"]);
            assert_eq!(revision_set(ds).len(), 3);
        });
    }
}
