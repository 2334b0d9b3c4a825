//! Datastore facade and recovery.

use crate::attachment::Attachments;
use crate::checkpoint::{CheckpointStore, ReplicationDirection};
use crate::config::Config;
use crate::conflict::{stage_resolution, ConflictResolver, Resolution};
use crate::dir::DatastoreDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexDefinition, IndexEngine};
use crate::log::{CheckpointRecord, LogRecord, RevisionLog, RevisionRecord};
use crate::query::{self, Query, QueryResult};
use crate::revision::{Revision, RevisionId, Sequence};
use crate::store::{Changes, RevisionStore, StagedRevision};
use crate::value::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use revdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which revision of a document to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionSelector {
    /// The winning revision; deleted documents are not found.
    Current,
    /// A specific revision, tombstones included.
    Specific(RevisionId),
}

impl From<RevisionId> for RevisionSelector {
    fn from(rev_id: RevisionId) -> Self {
        Self::Specific(rev_id)
    }
}

/// Result of inserting revision histories from another replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    /// Number of revisions that were new to this datastore.
    pub inserted: usize,
    /// Documents that were not conflicted before and are now.
    pub new_conflicts: Vec<String>,
}

/// Summary counters of a datastore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatastoreStats {
    /// Documents whose winner is not deleted.
    pub documents: usize,
    /// Documents whose winner is a tombstone.
    pub deleted_documents: usize,
    /// Revisions across every tree.
    pub revisions: usize,
    /// Documents with more than one live leaf.
    pub conflicted_documents: usize,
    /// Declared indexes.
    pub indexes: usize,
    /// Stored replication checkpoints.
    pub checkpoints: usize,
    /// Highest sequence assigned.
    pub last_sequence: Sequence,
    /// Size of the revision log in bytes.
    pub log_bytes: u64,
}

/// Everything guarded by a datastore's lock.
#[derive(Debug, Default)]
pub(crate) struct DatastoreState {
    pub(crate) store: RevisionStore,
    pub(crate) indexes: IndexEngine,
    pub(crate) checkpoints: CheckpointStore,
    next_batch: u64,
}

/// A named document store.
///
/// A `Datastore` owns the revision trees of its documents, its secondary
/// indexes and the replication checkpoints recorded against it. All state
/// sits behind one read/write lock: reads and queries share it, writes hold
/// it exclusively while they append to the log and apply the change, so the
/// sequence counter only ever moves forward and queries never see a
/// half-updated index.
///
/// # Example
///
/// ```rust
/// use revdb_core::{Datastore, RevisionSelector, Value};
///
/// let store = Datastore::open_in_memory("notes").unwrap();
/// let first = store
///     .save(Some("todo"), None, Value::object().with("title", "milk"), false)
///     .unwrap();
/// let second = store
///     .save(Some("todo"), Some(&first.rev_id), Value::object().with("title", "eggs"), false)
///     .unwrap();
///
/// let current = store.get("todo", RevisionSelector::Current).unwrap();
/// assert_eq!(current.rev_id, second.rev_id);
/// assert_eq!(current.rev_id.generation(), 2);
/// ```
pub struct Datastore {
    name: String,
    config: Config,
    state: Arc<RwLock<DatastoreState>>,
    log: RevisionLog,
    dir: Option<DatastoreDir>,
    key_fingerprint: Option<String>,
    closed: AtomicBool,
}

impl Datastore {
    /// Opens or creates a datastore in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreLocked` if another handle has the directory open,
    /// `LogCorruption` if the log is damaged, `Encryption` if the key in
    /// `config` does not match the log, or an I/O error.
    pub fn open(path: &Path, name: &str, config: Config) -> CoreResult<Self> {
        let dir = DatastoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.log_path())?;
        Self::from_parts(name, config, Box::new(backend), Some(dir))
    }

    /// Opens a fresh in-memory datastore.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other
    /// constructors.
    pub fn open_in_memory(name: &str) -> CoreResult<Self> {
        Self::open_with_backend(name, Config::default(), Box::new(InMemoryBackend::new()))
    }

    /// Opens a datastore over an existing backend, replaying its log.
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` if the log is damaged, or a storage error.
    pub fn open_with_backend(
        name: &str,
        config: Config,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        Self::from_parts(name, config, backend, None)
    }

    fn from_parts(
        name: &str,
        config: Config,
        backend: Box<dyn StorageBackend>,
        dir: Option<DatastoreDir>,
    ) -> CoreResult<Self> {
        let log = RevisionLog::new(backend, config.sync_on_commit)
            .with_key(config.encryption_key.as_ref());
        let state = Self::recover(name, &log)?;
        let key_fingerprint = config.encryption_key.as_ref().map(|k| k.fingerprint());

        tracing::info!(
            datastore = name,
            encrypted = key_fingerprint.is_some(),
            documents = state.store.live_count(),
            revisions = state.store.revision_count(),
            last_sequence = state.store.last_sequence(),
            indexes = state.indexes.len(),
            "datastore opened"
        );

        Ok(Self {
            name: name.to_string(),
            config,
            state: Arc::new(RwLock::new(state)),
            log,
            dir,
            key_fingerprint,
            closed: AtomicBool::new(false),
        })
    }

    fn recover(name: &str, log: &RevisionLog) -> CoreResult<DatastoreState> {
        let replay = log.replay()?;
        if replay.discarded_groups > 0 {
            tracing::warn!(
                datastore = name,
                groups = replay.discarded_groups,
                "discarded uncommitted log groups"
            );
        }

        let mut state = DatastoreState {
            next_batch: replay.last_batch + 1,
            ..DatastoreState::default()
        };

        for record in replay.records {
            match record {
                LogRecord::Revision(rev) => {
                    state.store.apply(&rev).map_err(|e| {
                        CoreError::log_corruption(format!(
                            "revision {} of {} cannot be replayed: {e}",
                            rev.rev_id, rev.doc_id
                        ))
                    })?;
                }
                LogRecord::IndexDefined(def) => {
                    state.indexes.define(def).map_err(|e| {
                        CoreError::log_corruption(format!("index definition cannot be replayed: {e}"))
                    })?;
                }
                LogRecord::IndexDropped { name } => {
                    state.indexes.drop_index(&name);
                }
                LogRecord::Checkpoint(cp) => {
                    state
                        .checkpoints
                        .set(&cp.replication_id, cp.direction, cp.sequence);
                }
                LogRecord::Begin { .. } | LogRecord::Commit { .. } => {}
            }
        }

        let DatastoreState { store, indexes, .. } = &mut state;
        for def in indexes.definitions() {
            indexes.build(&def.name, live_documents(store));
        }
        Ok(state)
    }

    /// Returns the datastore name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a stable identifier for replication ids: the directory path
    /// for on-disk datastores, the name otherwise.
    #[must_use]
    pub fn identifier(&self) -> String {
        self.dir
            .as_ref()
            .map_or_else(|| self.name.clone(), |d| d.path().display().to_string())
    }

    /// Returns the datastore configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true if the revision log is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.key_fingerprint.is_some()
    }

    /// Returns the fingerprint of the key the datastore was opened with.
    #[must_use]
    pub fn key_fingerprint(&self) -> Option<&str> {
        self.key_fingerprint.as_deref()
    }

    /// Marks the datastore closed. Later operations fail with
    /// `DatastoreClosed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(datastore = %self.name, "datastore closed");
        }
    }

    /// Returns true once [`Datastore::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::DatastoreClosed {
                name: self.name.clone(),
            })
        } else {
            Ok(())
        }
    }

    /// Logs `staged` as one group and applies it.
    fn commit(
        &self,
        state: &mut DatastoreState,
        staged: Vec<StagedRevision>,
    ) -> CoreResult<Vec<RevisionRecord>> {
        if staged.is_empty() {
            return Ok(Vec::new());
        }

        let records = state.store.assign_sequences(staged);
        let batch = state.next_batch;
        state.next_batch += 1;

        let mut frames = Vec::with_capacity(records.len() + 2);
        frames.push(LogRecord::Begin { batch });
        frames.extend(records.iter().cloned().map(LogRecord::Revision));
        frames.push(LogRecord::Commit { batch });
        self.log.append(&frames)?;

        let mut touched = BTreeSet::new();
        for record in &records {
            state.store.apply(record).map_err(|e| {
                CoreError::consistency(format!(
                    "logged revision {} of {} was not applied: {e}",
                    record.rev_id, record.doc_id
                ))
            })?;
            touched.insert(record.doc_id.as_str());
        }
        for doc_id in touched {
            let body = state.store.tree(doc_id).and_then(|t| t.live_body());
            state.indexes.update_document(doc_id, body);
        }
        Ok(records)
    }

    fn materialize(state: &DatastoreState, record: &RevisionRecord) -> CoreResult<Revision> {
        state.store.get_revision(&record.doc_id, &record.rev_id)
    }

    /// Stores a new revision without attachments.
    ///
    /// - `doc_id == None` creates a document with a generated id.
    /// - `parent == None` creates a document, or recreates one whose
    ///   current revision is a tombstone.
    /// - otherwise `parent` must be the document's current revision.
    ///   Other leaves of a conflicted document are only reachable through
    ///   conflict resolution.
    /// - `deleted == true` stores a tombstone with an empty body.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the parent is stale, unknown or not the
    /// current revision, or missing for a live document; `InvalidArgument`
    /// if the body is not an object or uses a reserved field.
    pub fn save(
        &self,
        doc_id: Option<&str>,
        parent: Option<&RevisionId>,
        body: Value,
        deleted: bool,
    ) -> CoreResult<Revision> {
        self.save_with_attachments(doc_id, parent, body, Attachments::new(), deleted)
    }

    /// Stores a new revision carrying `attachments`.
    ///
    /// The attachments are the revision's complete set; tombstones drop
    /// them. Otherwise the contract of [`Datastore::save`] applies.
    ///
    /// # Errors
    ///
    /// See [`Datastore::save`]. An attachment without a name or content
    /// type is `InvalidArgument`.
    pub fn save_with_attachments(
        &self,
        doc_id: Option<&str>,
        parent: Option<&RevisionId>,
        body: Value,
        attachments: Attachments,
        deleted: bool,
    ) -> CoreResult<Revision> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let staged = state
            .store
            .stage_save(doc_id, parent, body, attachments, deleted)?;
        let record = self
            .commit(&mut state, vec![staged])?
            .pop()
            .ok_or_else(|| CoreError::consistency("save produced no revision"))?;

        tracing::debug!(
            datastore = %self.name,
            doc_id = %record.doc_id,
            rev = %record.rev_id,
            sequence = record.sequence,
            deleted = record.deleted,
            attachments = record.attachments.len(),
            "saved revision"
        );
        Self::materialize(&state, &record)
    }

    /// Creates or updates a document; same contract as [`Datastore::save`]
    /// with `deleted == false`.
    ///
    /// # Errors
    ///
    /// See [`Datastore::save`].
    pub fn create_or_update(
        &self,
        doc_id: Option<&str>,
        parent: Option<&RevisionId>,
        body: Value,
    ) -> CoreResult<Revision> {
        self.save(doc_id, parent, body, false)
    }

    /// Reads a revision.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the document or revision is absent, or
    /// if `Current` is requested for a deleted document.
    pub fn get(&self, doc_id: &str, selector: RevisionSelector) -> CoreResult<Revision> {
        self.ensure_open()?;
        let state = self.state.read();
        match selector {
            RevisionSelector::Current => state.store.get_current(doc_id),
            RevisionSelector::Specific(rev_id) => state.store.get_revision(doc_id, &rev_id),
        }
    }

    /// Deletes a document by adding a tombstone child to its current
    /// revision `rev_id`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` for unknown documents and `Conflict` if
    /// `rev_id` is not the current revision or the document is already
    /// deleted.
    pub fn delete(&self, doc_id: &str, rev_id: &RevisionId) -> CoreResult<Revision> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let staged = state.store.stage_delete(doc_id, rev_id)?;
        let record = self
            .commit(&mut state, vec![staged])?
            .pop()
            .ok_or_else(|| CoreError::consistency("delete produced no revision"))?;

        tracing::debug!(datastore = %self.name, doc_id, rev = %record.rev_id, "deleted document");
        Self::materialize(&state, &record)
    }

    /// Returns the chain of revisions from the root to `rev_id`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the document or revision is absent.
    pub fn history(&self, doc_id: &str, rev_id: &RevisionId) -> CoreResult<Vec<Revision>> {
        self.ensure_open()?;
        let state = self.state.read();
        state
            .store
            .tree(doc_id)
            .ok_or_else(|| CoreError::document_not_found(doc_id))?
            .history(rev_id)
    }

    /// Lists documents changed after `since`, oldest change first.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreClosed` after the datastore is closed.
    pub fn changes_since(&self, since: Sequence, limit: Option<usize>) -> CoreResult<Changes> {
        self.ensure_open()?;
        let limit = limit.unwrap_or(self.config.default_changes_limit);
        Ok(self.state.read().store.changes_since(since, limit))
    }

    /// Returns, per document, the revisions in `revs` this datastore lacks.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreClosed` after the datastore is closed.
    pub fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<RevisionId>>,
    ) -> CoreResult<BTreeMap<String, Vec<RevisionId>>> {
        self.ensure_open()?;
        Ok(self.state.read().store.revs_diff(revs))
    }

    /// Inserts one revision chain from another replica.
    ///
    /// # Errors
    ///
    /// See [`Datastore::insert_histories`].
    pub fn insert_with_history(&self, doc_id: &str, chain: Vec<Revision>) -> CoreResult<InsertOutcome> {
        self.insert_histories(&[(doc_id.to_string(), chain)])
    }

    /// Inserts revision chains from another replica as one log group.
    ///
    /// Chains run root first. Revisions already present are skipped, new
    /// ones are grafted under their parents without any tip check, so a
    /// chain that diverges from local edits produces a conflict.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a chain is not a parent chain or starts
    /// below an unknown revision, or a storage error if the log append
    /// fails (nothing is applied in that case).
    pub fn insert_histories(&self, histories: &[(String, Vec<Revision>)]) -> CoreResult<InsertOutcome> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let staged = state.store.stage_histories(histories)?;

        let docs: BTreeSet<&str> = staged.iter().map(|s| s.doc_id.as_str()).collect();
        let was_conflicted: BTreeSet<String> = docs
            .iter()
            .filter(|d| state.store.tree(d).is_some_and(|t| t.is_conflicted()))
            .map(|d| (*d).to_string())
            .collect();
        let docs: Vec<String> = docs.into_iter().map(str::to_string).collect();

        let records = self.commit(&mut state, staged)?;
        let new_conflicts: Vec<String> = docs
            .into_iter()
            .filter(|d| !was_conflicted.contains(d))
            .filter(|d| state.store.tree(d).is_some_and(|t| t.is_conflicted()))
            .collect();

        if !records.is_empty() {
            tracing::debug!(
                datastore = %self.name,
                inserted = records.len(),
                new_conflicts = new_conflicts.len(),
                "inserted replicated revisions"
            );
        }
        Ok(InsertOutcome {
            inserted: records.len(),
            new_conflicts,
        })
    }

    /// Returns the ids of live documents, sorted.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreClosed` after the datastore is closed.
    pub fn document_ids(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.state.read().store.document_ids(false))
    }

    /// Returns the number of live documents.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreClosed` after the datastore is closed.
    pub fn document_count(&self) -> CoreResult<usize> {
        self.ensure_open()?;
        Ok(self.state.read().store.live_count())
    }

    /// Returns the highest sequence assigned so far (0 when empty).
    #[must_use]
    pub fn last_sequence(&self) -> Sequence {
        self.state.read().store.last_sequence()
    }

    /// Declares an index over `fields` and builds it.
    ///
    /// Returns the index name. Declaring an identical index again does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty name or field list and
    /// `IndexConflict` if `name` is taken by a different definition.
    pub fn ensure_indexed(&self, fields: &[impl AsRef<str>], name: &str) -> CoreResult<String> {
        self.ensure_open()?;
        let definition = IndexDefinition::new(name, fields)?;

        let mut state = self.state.write();
        let DatastoreState { store, indexes, .. } = &mut *state;
        if !indexes.define(definition.clone())? {
            return Ok(definition.name);
        }

        if let Err(err) = self.log.append(&[LogRecord::IndexDefined(definition.clone())]) {
            indexes.drop_index(&definition.name);
            return Err(err);
        }
        indexes.build(&definition.name, live_documents(store));

        tracing::info!(
            datastore = %self.name,
            index = %definition.name,
            fields = ?definition.fields,
            entries = indexes.entry_count(&definition.name).unwrap_or(0),
            "index created"
        );
        Ok(definition.name)
    }

    /// Drops an index. Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the log append fails.
    pub fn delete_index(&self, name: &str) -> CoreResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if !state.indexes.contains(name) {
            return Ok(());
        }
        self.log.append(&[LogRecord::IndexDropped {
            name: name.to_string(),
        }])?;
        state.indexes.drop_index(name);
        tracing::info!(datastore = %self.name, index = name, "index dropped");
        Ok(())
    }

    /// Returns every index definition, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreClosed` after the datastore is closed.
    pub fn list_indexes(&self) -> CoreResult<Vec<IndexDefinition>> {
        self.ensure_open()?;
        Ok(self.state.read().indexes.definitions())
    }

    /// Runs a query over the live documents.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreClosed` after the datastore is closed.
    pub fn find(&self, query: &Query) -> CoreResult<QueryResult> {
        self.ensure_open()?;
        let state = self.state.read();
        let (hits, plan) = query::execute(
            &state.store,
            &state.indexes,
            query,
            self.config.scan_warning_threshold,
        );
        drop(state);

        let fields = query.fields.as_deref().map(query::projection_fields);
        Ok(QueryResult::new(Arc::clone(&self.state), hits, fields, plan))
    }

    /// Returns the ids of conflicted documents, sorted.
    ///
    /// # Errors
    ///
    /// Returns `DatastoreClosed` after the datastore is closed.
    pub fn conflicted_document_ids(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.state.read().store.conflicted_ids())
    }

    /// Returns every live leaf of a document, current winner first.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` for unknown documents.
    pub fn conflicts(&self, doc_id: &str) -> CoreResult<Vec<Revision>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state
            .store
            .tree(doc_id)
            .ok_or_else(|| CoreError::document_not_found(doc_id))?
            .live_leaves())
    }

    /// Resolves a conflicted document and returns its new current revision.
    ///
    /// Documents that are not conflicted are left alone and their current
    /// revision is returned.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` for unknown documents, `InvalidArgument`
    /// for a resolution that does not fit the tree, or `Consistency` if the
    /// document is still conflicted afterwards.
    pub fn resolve_conflicts(&self, doc_id: &str, resolution: Resolution) -> CoreResult<Revision> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let tree = state
            .store
            .tree(doc_id)
            .ok_or_else(|| CoreError::document_not_found(doc_id))?;
        if !tree.is_conflicted() {
            return state.store.get_current(doc_id);
        }

        let losers = tree.live_leaves().len() - 1;
        let staged = stage_resolution(tree, &resolution)?;
        self.commit(&mut state, staged)?;

        let tree = state
            .store
            .tree(doc_id)
            .ok_or_else(|| CoreError::consistency(format!("{doc_id} vanished during resolution")))?;
        if tree.is_conflicted() {
            return Err(CoreError::consistency(format!(
                "{doc_id} is still conflicted after resolution"
            )));
        }

        tracing::info!(datastore = %self.name, doc_id, tombstoned = losers, "resolved conflict");
        state.store.get_current(doc_id)
    }

    /// Asks `resolver` how to resolve a document and applies its answer.
    ///
    /// Returns `Ok(None)` if the resolver declined. Documents that are not
    /// conflicted are returned unchanged without consulting the resolver.
    ///
    /// # Errors
    ///
    /// See [`Datastore::resolve_conflicts`].
    pub fn resolve_with(
        &self,
        doc_id: &str,
        resolver: &dyn ConflictResolver,
    ) -> CoreResult<Option<Revision>> {
        let conflicts = self.conflicts(doc_id)?;
        if conflicts.len() < 2 {
            return self.get(doc_id, RevisionSelector::Current).map(Some);
        }
        match resolver.resolve(doc_id, &conflicts) {
            Some(resolution) => self.resolve_conflicts(doc_id, resolution).map(Some),
            None => {
                tracing::debug!(datastore = %self.name, doc_id, "resolver left conflict in place");
                Ok(None)
            }
        }
    }

    /// Returns the checkpoint stored for a replication, if any.
    #[must_use]
    pub fn checkpoint(&self, replication_id: &str, direction: ReplicationDirection) -> Option<Sequence> {
        self.state.read().checkpoints.get(replication_id, direction)
    }

    /// Persists a replication checkpoint.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the log append fails.
    pub fn set_checkpoint(
        &self,
        replication_id: &str,
        direction: ReplicationDirection,
        sequence: Sequence,
    ) -> CoreResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        self.log.append(&[LogRecord::Checkpoint(CheckpointRecord {
            replication_id: replication_id.to_string(),
            direction,
            sequence,
        })])?;
        state.checkpoints.set(replication_id, direction, sequence);
        Ok(())
    }

    /// Returns summary counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the log size cannot be read.
    pub fn stats(&self) -> CoreResult<DatastoreStats> {
        let state = self.state.read();
        let documents = state.store.live_count();
        Ok(DatastoreStats {
            documents,
            deleted_documents: state.store.document_total() - documents,
            revisions: state.store.revision_count(),
            conflicted_documents: state.store.conflicted_ids().len(),
            indexes: state.indexes.len(),
            checkpoints: state.checkpoints.len(),
            last_sequence: state.store.last_sequence(),
            log_bytes: self.log.size()?,
        })
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("name", &self.name)
            .field("encrypted", &self.is_encrypted())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn live_documents(store: &RevisionStore) -> impl Iterator<Item = (&str, &Value)> {
    store
        .trees()
        .filter_map(|t| t.live_body().map(|body| (t.doc_id(), body)))
}
