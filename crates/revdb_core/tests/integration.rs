//! Integration tests for the datastore engine.

use revdb_core::{
    Config, CoreError, Datastore, DatastoreManager, KeepCurrent, LogRecord, Query, QueryPlan,
    ReplicationDirection, Resolution, Revision, RevisionId, RevisionLog, RevisionRecord,
    RevisionSelector, SortDirection, Value,
};
use revdb_storage::{InMemoryBackend, StorageBackend};
use revdb_testkit::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;

fn query(json: serde_json::Value) -> Query {
    Query::from_value(&body(json)).unwrap()
}

#[test]
fn stale_parent_conflicts_until_retried_with_fresh_tip() {
    with_temp_datastore(|ds| {
        let r1 = ds.save(Some("doc"), None, body(json!({"v": 1})), false).unwrap();
        let r2 = ds
            .save(Some("doc"), Some(&r1.rev_id), body(json!({"v": 2})), false)
            .unwrap();

        let err = ds
            .save(Some("doc"), Some(&r1.rev_id), body(json!({"v": 3})), false)
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));

        let fresh = ds.get("doc", RevisionSelector::Current).unwrap();
        assert_eq!(fresh.rev_id, r2.rev_id);
        let r3 = ds
            .save(Some("doc"), Some(&fresh.rev_id), body(json!({"v": 3})), false)
            .unwrap();
        assert_eq!(r3.generation(), 3);
        assert_eq!(r3.sequence, 3);
    });
}

#[test]
fn missing_parent_on_live_document_conflicts() {
    with_temp_datastore(|ds| {
        ds.save(Some("doc"), None, Value::object(), false).unwrap();
        assert!(matches!(
            ds.create_or_update(Some("doc"), None, Value::object()),
            Err(CoreError::Conflict { .. })
        ));

        let unknown = RevisionId::from_parts(1, "abc").unwrap();
        assert!(matches!(
            ds.save(Some("doc"), Some(&unknown), Value::object(), false),
            Err(CoreError::Conflict { .. })
        ));
    });
}

#[test]
fn concurrent_saves_against_one_tip() {
    let ds = Arc::new(Datastore::open_in_memory("race").unwrap());
    let root = ds.save(Some("doc"), None, Value::object(), false).unwrap();

    let writers = 8;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let ds = Arc::clone(&ds);
            let barrier = Arc::clone(&barrier);
            let parent = root.rev_id.clone();
            thread::spawn(move || {
                barrier.wait();
                let writer = i64::try_from(i).unwrap();
                ds.save(Some("doc"), Some(&parent), Value::object().with("w", writer), false)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, CoreError::Conflict { .. })));
    assert_eq!(ds.last_sequence(), 2);
}

#[test]
fn deleting_and_recreating_a_document() {
    with_temp_datastore(|ds| {
        let r1 = ds.save(Some("doc"), None, body(json!({"v": 1})), false).unwrap();
        let tomb = ds.delete("doc", &r1.rev_id).unwrap();
        assert_eq!(tomb.generation(), 2);

        assert!(matches!(
            ds.delete("doc", &tomb.rev_id),
            Err(CoreError::Conflict { .. })
        ));

        let again = ds.save(Some("doc"), None, body(json!({"v": 2})), false).unwrap();
        assert_eq!(again.parent.as_ref(), Some(&tomb.rev_id));
        assert_eq!(again.generation(), 3);
        assert_eq!(
            ds.get("doc", RevisionSelector::Current).unwrap().body,
            body(json!({"v": 2}))
        );
    });
}

#[test]
fn generated_ids_and_reserved_fields() {
    with_temp_datastore(|ds| {
        let a = ds.save(None, None, Value::object(), false).unwrap();
        let b = ds.save(None, None, Value::object(), false).unwrap();
        assert_ne!(a.doc_id, b.doc_id);
        assert!(!a.doc_id.is_empty());

        for bad in [json!({"_id": "x"}), json!({"_rev": "1-a"}), json!([1, 2])] {
            assert!(matches!(
                ds.save(Some("c"), None, body(bad), false),
                Err(CoreError::InvalidArgument { .. })
            ));
        }
    });
}

#[test]
fn ensure_indexed_is_idempotent() {
    with_temp_datastore(|ds| {
        assert_eq!(ds.ensure_indexed(&["age"], "by_age").unwrap(), "by_age");
        assert_eq!(ds.ensure_indexed(&["age"], "by_age").unwrap(), "by_age");
        assert_eq!(ds.list_indexes().unwrap().len(), 1);

        match ds.ensure_indexed(&["name"], "by_age") {
            Err(CoreError::IndexConflict { name, existing }) => {
                assert_eq!(name, "by_age");
                assert_eq!(existing, ["age"]);
            }
            other => panic!("expected IndexConflict, got {other:?}"),
        }

        let no_fields: [&str; 0] = [];
        assert!(matches!(
            ds.ensure_indexed(&no_fields, "empty"),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(ds.ensure_indexed(&["x"], "").is_err());

        ds.delete_index("by_age").unwrap();
        ds.delete_index("by_age").unwrap();
        assert!(ds.list_indexes().unwrap().is_empty());
    });
}

#[test]
fn queries_use_indexes_and_recheck_the_selector() {
    with_temp_datastore(|ds| {
        for (id, city, age) in [
            ("ann", "Oslo", 31),
            ("bob", "Rome", 25),
            ("cat", "Oslo", 19),
            ("dan", "Lima", 44),
        ] {
            ds.save(
                Some(id),
                None,
                body(json!({"address": {"city": city}, "age": age})),
                false,
            )
            .unwrap();
        }
        ds.save(Some("eve"), None, body(json!({"age": 60})), false).unwrap();
        ds.ensure_indexed(&["address.city", "age"], "by_city").unwrap();

        let result = ds
            .find(&query(json!({"selector": {"address.city": "Oslo", "age": {"$gt": 20}}})))
            .unwrap();
        assert_eq!(
            result.plan(),
            &QueryPlan::IndexScan {
                index: "by_city".into(),
                field: "address.city".into()
            }
        );
        assert_eq!(result.document_ids(), ["ann"]);

        let result = ds
            .find(&query(json!({"selector": {"$or": [{"age": {"$lt": 20}}, {"age": {"$gte": 60}}]}})))
            .unwrap();
        assert_eq!(result.plan(), &QueryPlan::FullScan);
        assert_eq!(result.document_ids(), ["cat", "eve"]);

        let result = ds
            .find(&query(json!({"selector": {"address": {"$exists": false}}})))
            .unwrap();
        assert_eq!(result.document_ids(), ["eve"]);

        let result = ds
            .find(&query(json!({
                "selector": {"address.city": {"$in": ["Rome", "Lima"]}},
                "sort": [{"age": "desc"}],
                "fields": ["age"]
            })))
            .unwrap();
        assert_eq!(result.document_ids(), ["dan", "bob"]);
        let bodies: Vec<Value> = result.iter().map(|r| r.body).collect();
        assert_eq!(bodies, [body(json!({"age": 44})), body(json!({"age": 25}))]);

        assert!(matches!(
            Query::parse(&body(json!({"age": {"$regex": "x"}}))),
            Err(CoreError::InvalidQuery { .. })
        ));
    });
}

#[test]
fn query_results_are_snapshots() {
    let test_ds = scenarios::populated(20);
    let result = test_ds
        .find(&Query::parse(&body(json!({"even": true}))).unwrap().sort("n", SortDirection::Asc))
        .unwrap();
    assert_eq!(result.len(), 10);

    let first = test_ds.get("doc-0000", RevisionSelector::Current).unwrap();
    test_ds
        .save(Some("doc-0000"), Some(&first.rev_id), body(json!({"n": 0, "even": false})), false)
        .unwrap();
    test_ds
        .save(Some("doc-9999"), None, body(json!({"n": 99, "even": true})), false)
        .unwrap();

    let once: Vec<Revision> = result.iter().collect();
    let twice: Vec<Revision> = result.iter().collect();
    assert_eq!(once, twice);
    assert_eq!(once.len(), 10);
    assert_eq!(once[0].rev_id, first.rev_id);
    assert_eq!(once[0].body.get("even"), Some(&Value::Bool(true)));
}

#[test]
fn conflicts_are_detected_and_resolved_by_picking_a_winner() {
    with_temp_datastore(|ds| {
        let (local, remote) = scenarios::conflicted(ds, "doc");
        assert_eq!(ds.conflicted_document_ids().unwrap(), ["doc"]);

        let leaves = ds.conflicts("doc").unwrap();
        assert_eq!(leaves.len(), 2);
        assert!(leaves[0].current);
        let winner = leaves[0].rev_id.clone();
        assert_eq!(winner, local.rev_id.clone().max(remote.rev_id.clone()));

        let loser = if winner == local.rev_id { &remote } else { &local };
        let resolved = ds
            .resolve_conflicts("doc", Resolution::PickWinner(loser.rev_id.clone()))
            .unwrap();
        assert_eq!(resolved.rev_id, loser.rev_id);
        assert!(ds.conflicted_document_ids().unwrap().is_empty());
        assert_eq!(ds.conflicts("doc").unwrap().len(), 1);
    });
}

#[test]
fn writes_must_extend_the_current_winner() {
    with_temp_datastore(|ds| {
        let (local, remote) = scenarios::conflicted(ds, "doc");
        let winner = local.rev_id.clone().max(remote.rev_id.clone());
        let loser = local.rev_id.clone().min(remote.rev_id.clone());

        let err = ds
            .save(Some("doc"), Some(&loser), body(json!({"v": "late"})), false)
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert!(matches!(ds.delete("doc", &loser), Err(CoreError::Conflict { .. })));
        assert_eq!(ds.conflicts("doc").unwrap().len(), 2);

        ds.resolve_conflicts("doc", Resolution::PickWinner(winner.clone()))
            .unwrap();
        let leaves = ds
            .changes_since(0, None)
            .unwrap()
            .entries
            .into_iter()
            .find(|e| e.doc_id == "doc")
            .unwrap()
            .leaves;
        let tombstone = leaves.into_iter().find(|l| *l != winner).unwrap();
        assert_eq!(tombstone.generation(), 3);

        let err = ds
            .save(Some("doc"), Some(&tombstone), body(json!({"v": "revived"})), false)
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert!(matches!(ds.delete("doc", &tombstone), Err(CoreError::Conflict { .. })));
        assert!(ds.conflicted_document_ids().unwrap().is_empty());

        let next = ds
            .save(Some("doc"), Some(&winner), body(json!({"v": "next"})), false)
            .unwrap();
        assert_eq!(next.parent, Some(winner));
        assert!(ds.conflicted_document_ids().unwrap().is_empty());
    });
}

#[test]
fn merge_resolution_and_resolver_callbacks() {
    with_temp_datastore(|ds| {
        scenarios::conflicted(ds, "merge");
        let merged = ds
            .resolve_conflicts("merge", Resolution::Merge(body(json!({"v": "both"}))))
            .unwrap();
        assert_eq!(merged.generation(), 3);
        assert_eq!(merged.body, body(json!({"v": "both"})));

        scenarios::conflicted(ds, "skip");
        let declined = ds
            .resolve_with("skip", &|_: &str, _: &[Revision]| -> Option<Resolution> { None })
            .unwrap();
        assert!(declined.is_none());
        assert_eq!(ds.conflicted_document_ids().unwrap(), ["skip"]);

        let kept = ds.resolve_with("skip", &KeepCurrent).unwrap().unwrap();
        assert!(ds.conflicted_document_ids().unwrap().is_empty());
        assert_eq!(ds.get("skip", RevisionSelector::Current).unwrap().rev_id, kept.rev_id);

        assert!(matches!(
            ds.resolve_conflicts("merge", Resolution::PickWinner(merged.rev_id.clone())),
            Ok(ref r) if r.rev_id == merged.rev_id
        ));
    });
}

#[test]
fn changes_list_each_document_once() {
    with_temp_datastore(|ds| {
        let a1 = ds.save(Some("a"), None, Value::object(), false).unwrap();
        ds.save(Some("b"), None, Value::object(), false).unwrap();
        ds.save(Some("a"), Some(&a1.rev_id), Value::object(), false).unwrap();
        ds.save(Some("c"), None, Value::object(), false).unwrap();

        let changes = ds.changes_since(0, None).unwrap();
        let listed: Vec<(u64, &str)> = changes
            .entries
            .iter()
            .map(|e| (e.sequence, e.doc_id.as_str()))
            .collect();
        assert_eq!(listed, [(2, "b"), (3, "a"), (4, "c")]);
        assert_eq!(changes.last_sequence, 4);

        let page = ds.changes_since(2, Some(1)).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.last_sequence, 3);

        let empty = ds.changes_since(4, None).unwrap();
        assert!(empty.entries.is_empty());
        assert_eq!(empty.last_sequence, 4);
    });
}

#[test]
fn revs_diff_and_history_insertion_are_idempotent() {
    let source = TestDatastore::memory("source");
    let target = TestDatastore::memory("target");

    let r1 = source.save(Some("d"), None, body(json!({"v": 1})), false).unwrap();
    let r2 = source
        .save(Some("d"), Some(&r1.rev_id), body(json!({"v": 2})), false)
        .unwrap();

    let mut ask = BTreeMap::new();
    ask.insert("d".to_string(), vec![r2.rev_id.clone()]);
    assert_eq!(target.revs_diff(&ask).unwrap(), ask);

    let chain = source.history("d", &r2.rev_id).unwrap();
    assert_eq!(chain.len(), 2);
    let outcome = target.insert_with_history("d", chain.clone()).unwrap();
    assert_eq!(outcome.inserted, 2);
    assert!(outcome.new_conflicts.is_empty());
    assert!(target.revs_diff(&ask).unwrap().is_empty());

    let again = target.insert_with_history("d", chain).unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(revision_set(&source), revision_set(&target));
}

#[test]
fn replay_restores_documents_indexes_and_checkpoints() {
    let test_ds = TestDatastore::file("replayed");
    let r1 = test_ds.save(Some("a"), None, body(json!({"k": 1})), false).unwrap();
    test_ds.save(Some("b"), None, body(json!({"k": 2})), false).unwrap();
    test_ds.delete("a", &r1.rev_id).unwrap();
    test_ds.ensure_indexed(&["k"], "by_k").unwrap();
    test_ds
        .set_checkpoint("rep-1", ReplicationDirection::Push, 3)
        .unwrap();
    let before = revision_set(&test_ds);

    let test_ds = test_ds.reopen();
    assert_eq!(revision_set(&test_ds), before);
    assert_eq!(test_ds.last_sequence(), 3);
    assert_eq!(test_ds.document_ids().unwrap(), ["b"]);
    assert_eq!(test_ds.checkpoint("rep-1", ReplicationDirection::Push), Some(3));
    assert_eq!(test_ds.checkpoint("rep-1", ReplicationDirection::Pull), None);

    let result = test_ds.find(&Query::parse(&body(json!({"k": 2}))).unwrap()).unwrap();
    assert!(matches!(result.plan(), QueryPlan::IndexScan { .. }));
    assert_eq!(result.document_ids(), ["b"]);
}

#[test]
fn torn_tail_is_cut_on_reopen() {
    let backend = CrashableBackend::new();
    let ds = Datastore::open_with_backend("t", Config::default(), Box::new(backend.handle()))
        .unwrap();
    ds.save(Some("kept"), None, Value::object(), false).unwrap();
    let committed = backend.bytes_written();

    backend.crash_after(committed + 30);
    assert!(ds.save(Some("lost"), None, Value::object(), false).is_err());
    assert!(backend.bytes_written() > committed);
    drop(ds);

    let survivor = backend.surviving();
    let ds = Datastore::open_with_backend("t", Config::default(), Box::new(survivor.share()))
        .unwrap();
    assert_eq!(ds.document_ids().unwrap(), ["kept"]);
    assert_eq!(survivor.size().unwrap(), committed);

    let next = ds.save(Some("next"), None, Value::object(), false).unwrap();
    assert_eq!(next.sequence, 2);
}

#[test]
fn uncommitted_group_is_discarded() {
    let backend = InMemoryBackend::new();
    {
        let ds = Datastore::open_with_backend("t", Config::default(), Box::new(backend.share()))
            .unwrap();
        ds.save(Some("a"), None, Value::object(), false).unwrap();
    }

    let log = RevisionLog::new(Box::new(backend.share()), false);
    log.append(&[
        LogRecord::Begin { batch: 99 },
        LogRecord::Revision(RevisionRecord {
            doc_id: "ghost".into(),
            rev_id: RevisionId::new_root(),
            parent: None,
            body: Value::object(),
            deleted: false,
            sequence: 2,
            attachments: Default::default(),
        }),
    ])
    .unwrap();

    let ds = Datastore::open_with_backend("t", Config::default(), Box::new(backend.share()))
        .unwrap();
    assert_eq!(ds.document_ids().unwrap(), ["a"]);
    assert!(ds.get("ghost", RevisionSelector::Current).unwrap_err().is_not_found());
    assert_eq!(ds.last_sequence(), 1);
}

#[test]
fn corruption_before_the_tail_fails_open() {
    let backend = InMemoryBackend::new();
    {
        let ds = Datastore::open_with_backend("t", Config::default(), Box::new(backend.share()))
            .unwrap();
        ds.save(Some("a"), None, body(json!({"text": "hello"})), false).unwrap();
        ds.save(Some("b"), None, Value::object(), false).unwrap();
    }

    let mut bytes = backend.data();
    bytes[20] ^= 0xFF;
    let err = Datastore::open_with_backend(
        "t",
        Config::default(),
        Box::new(InMemoryBackend::with_data(bytes)),
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::LogCorruption { .. }));
}

#[test]
fn a_datastore_directory_is_locked_while_open() {
    with_file_datastore(|_ds, path| {
        let err = Datastore::open(path, "again", Config::default()).unwrap_err();
        assert!(matches!(err, CoreError::DatastoreLocked { .. }));
    });
}

#[test]
fn manager_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let manager = DatastoreManager::open(root.path(), Config::default()).unwrap();
    let a = manager.open_datastore("alpha").unwrap();
    manager.open_datastore("beta").unwrap();
    assert_eq!(manager.list_datastores().unwrap(), ["alpha", "beta"]);

    manager.delete_datastore("alpha").unwrap();
    assert!(matches!(
        a.save(None, None, Value::object(), false),
        Err(CoreError::DatastoreClosed { .. })
    ));
    assert_eq!(manager.list_datastores().unwrap(), ["beta"]);
    assert!(manager.open_datastore("bad name").is_err());
}
