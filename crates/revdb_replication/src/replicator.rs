//! Replicator lifecycle and batch worker.

use crate::config::{Direction, ReplicatorConfig};
use crate::error::{ReplicationError, ReplicationResult};
use crate::peer::{DatastorePeer, ReplicationPeer};
use crate::state::{ReplicationEvent, ReplicationState, ReplicationStatus};
use parking_lot::{Mutex, RwLock};
use revdb_core::{Changes, Datastore, InsertOutcome, ReplicationDirection, RevisionId};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Derives the stable id of a replication between two replicas.
///
/// The id is the hex SHA-256 of both identifiers and the direction, so a
/// replicator recreated with the same endpoints finds its checkpoints.
pub fn replication_id(local: &str, peer: &str, direction: Direction) -> String {
    let mut hasher = Sha256::new();
    for part in [local, peer, direction.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// State shared between a replicator and its worker.
#[derive(Debug)]
struct Shared {
    status: RwLock<ReplicationStatus>,
    stop_requested: AtomicBool,
    subscribers: Mutex<Vec<Sender<ReplicationEvent>>>,
}

impl Shared {
    fn emit(&self, event: ReplicationEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn request_stop(&self) -> ReplicationState {
        let mut status = self.status.write();
        if status.state != ReplicationState::Started {
            return status.state;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        status.state = ReplicationState::Stopping;
        drop(status);

        self.emit(ReplicationEvent::StateChanged {
            from: ReplicationState::Started,
            to: ReplicationState::Stopping,
        });
        ReplicationState::Stopping
    }
}

/// Requests a stop from anywhere, including from inside a peer call made
/// by the replicator's own worker.
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Asks the worker to stop at the next batch boundary and returns the
    /// resulting state. Does nothing unless the replicator is `Started`.
    pub fn stop(&self) -> ReplicationState {
        self.shared.request_stop()
    }
}

/// Moves revisions between a local datastore and a peer.
///
/// `start` spawns a worker thread and returns immediately. The worker runs
/// batches of at most `batch_size` changed documents; a batch is fetched
/// from the source, applied at the target and only then checkpointed in the
/// local datastore. Progress is visible through [`Replicator::status`] and
/// [`Replicator::subscribe`].
pub struct Replicator {
    id: String,
    config: ReplicatorConfig,
    local: Arc<Datastore>,
    peer: Arc<dyn ReplicationPeer>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Replicator {
    /// Creates a replicator in the `Pending` state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is unusable or the local
    /// datastore is closed.
    pub fn new(
        local: Arc<Datastore>,
        peer: Arc<dyn ReplicationPeer>,
        config: ReplicatorConfig,
    ) -> ReplicationResult<Self> {
        config.validate()?;
        if local.is_closed() {
            return Err(ReplicationError::InvalidConfig(format!(
                "local datastore {} is closed",
                local.name()
            )));
        }

        let id = replication_id(&local.identifier(), &peer.identifier(), config.direction);
        tracing::debug!(replication = %id, direction = %config.direction, "replicator created");

        Ok(Self {
            id,
            config,
            local,
            peer,
            shared: Arc::new(Shared {
                status: RwLock::new(ReplicationStatus::default()),
                stop_requested: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Returns the replication id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the configured direction.
    pub fn direction(&self) -> Direction {
        self.config.direction
    }

    /// Returns the local datastore.
    pub fn local(&self) -> &Arc<Datastore> {
        &self.local
    }

    /// Returns the current state.
    pub fn state(&self) -> ReplicationState {
        self.shared.status.read().state
    }

    /// Returns a snapshot of the progress counters.
    pub fn status(&self) -> ReplicationStatus {
        self.shared.status.read().clone()
    }

    /// Returns a channel that receives every later event.
    pub fn subscribe(&self) -> Receiver<ReplicationEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Returns a handle that can stop this replicator.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Starts a run on a background thread.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the replicator is `Pending`,
    /// `Complete`, `Stopped` or `Error`, and `Worker` if the thread cannot
    /// be spawned.
    pub fn start(&self) -> ReplicationResult<()> {
        let mut worker = self.worker.lock();

        let from = {
            let mut status = self.shared.status.write();
            if !status.state.can_start() {
                return Err(ReplicationError::InvalidStateTransition {
                    from: status.state.to_string(),
                    to: ReplicationState::Started.to_string(),
                });
            }
            let from = status.state;
            *status = ReplicationStatus {
                state: ReplicationState::Started,
                ..ReplicationStatus::default()
            };
            self.shared.stop_requested.store(false, Ordering::SeqCst);
            from
        };
        self.shared.emit(ReplicationEvent::StateChanged {
            from,
            to: ReplicationState::Started,
        });

        if let Some(previous) = worker.take() {
            join_worker(&self.id, previous);
        }

        let run = Run {
            id: self.id.clone(),
            config: self.config.clone(),
            local: DatastorePeer::new(Arc::clone(&self.local)),
            peer: Arc::clone(&self.peer),
            shared: Arc::clone(&self.shared),
        };
        let short_id: String = self.id.chars().take(12).collect();
        let handle = thread::Builder::new()
            .name(format!("revdb-replicator-{short_id}"))
            .spawn(move || run.execute())
            .map_err(|e| {
                let mut status = self.shared.status.write();
                status.state = ReplicationState::Error;
                status.last_error = Some(e.to_string());
                ReplicationError::Worker(e.to_string())
            })?;
        *worker = Some(handle);

        tracing::info!(
            replication = %self.id,
            direction = %self.config.direction,
            datastore = %self.local.name(),
            "replication started"
        );
        Ok(())
    }

    /// Asks the worker to stop at the next batch boundary and returns the
    /// resulting state. Does nothing unless the replicator is `Started`.
    pub fn stop(&self) -> ReplicationState {
        self.shared.request_stop()
    }

    /// Blocks until the current run, if any, has finished and returns the
    /// final status.
    pub fn wait(&self) -> ReplicationStatus {
        if let Some(handle) = self.worker.lock().take() {
            join_worker(&self.id, handle);
        }
        self.status()
    }

    /// Stops the replicator if it is running and waits for its worker.
    pub fn destroy(&self) -> ReplicationStatus {
        self.stop();
        let status = self.wait();
        tracing::debug!(replication = %self.id, state = %status.state, "replicator destroyed");
        status
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("id", &self.id)
            .field("direction", &self.config.direction)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.shared.request_stop();
        if let Some(handle) = self.worker.get_mut().take() {
            join_worker(&self.id, handle);
        }
    }
}

/// Joins a worker thread. Returns false, after logging, if it panicked.
fn join_worker(id: &str, handle: JoinHandle<()>) -> bool {
    let joined = handle.join().is_ok();
    if !joined {
        tracing::warn!(replication = %id, "replication worker panicked");
    }
    joined
}

/// Everything the worker thread needs for one run.
struct Run {
    id: String,
    config: ReplicatorConfig,
    local: DatastorePeer,
    peer: Arc<dyn ReplicationPeer>,
    shared: Arc<Shared>,
}

impl Run {
    fn execute(self) {
        let result = self.run_legs();

        let mut status = self.shared.status.write();
        let from = status.state;
        let (to, event) = match result {
            Ok(()) if self.shared.stop_requested() => (ReplicationState::Stopped, None),
            Ok(()) => (
                ReplicationState::Complete,
                Some(ReplicationEvent::Complete {
                    documents_replicated: status.documents_processed,
                }),
            ),
            Err(ReplicationError::Cancelled) => (ReplicationState::Stopped, None),
            Err(err) => {
                let message = err.to_string();
                status.last_error = Some(message.clone());
                (ReplicationState::Error, Some(ReplicationEvent::Error { message }))
            }
        };
        status.state = to;
        let documents = status.documents_processed;
        drop(status);

        match to {
            ReplicationState::Error => tracing::warn!(
                replication = %self.id,
                documents,
                "replication failed"
            ),
            _ => tracing::info!(
                replication = %self.id,
                state = %to,
                documents,
                "replication finished"
            ),
        }

        self.shared.emit(ReplicationEvent::StateChanged { from, to });
        if let Some(event) = event {
            self.shared.emit(event);
        }
    }

    /// Returns `(source, target)` for a leg.
    fn sides(&self, leg: ReplicationDirection) -> (&dyn ReplicationPeer, &dyn ReplicationPeer) {
        let local: &dyn ReplicationPeer = &self.local;
        let peer: &dyn ReplicationPeer = self.peer.as_ref();
        match leg {
            ReplicationDirection::Pull => (peer, local),
            ReplicationDirection::Push => (local, peer),
        }
    }

    fn checkpoint(&self, leg: ReplicationDirection) -> u64 {
        self.local.datastore().checkpoint(&self.id, leg).unwrap_or(0)
    }

    fn run_legs(&self) -> ReplicationResult<()> {
        let legs = self.config.direction.legs();

        let mut estimate = 0;
        for &leg in legs {
            let (source, _) = self.sides(leg);
            let last = self.with_retry(|| source.last_sequence())?;
            estimate += last.saturating_sub(self.checkpoint(leg));
        }
        self.shared.status.write().total_estimate = estimate;

        for &leg in legs {
            self.run_leg(leg)?;
        }
        Ok(())
    }

    fn run_leg(&self, leg: ReplicationDirection) -> ReplicationResult<()> {
        let (source, target) = self.sides(leg);
        let batch_size = self.config.batch_size;

        loop {
            if self.shared.stop_requested() {
                return Err(ReplicationError::Cancelled);
            }

            let since = self.checkpoint(leg);
            let changes = self.with_retry(|| source.changes_since(since, batch_size))?;
            if changes.entries.is_empty() {
                return Ok(());
            }

            let outcome = self.with_retry(|| transfer(source, target, &changes))?;
            self.with_retry(|| {
                self.local
                    .datastore()
                    .set_checkpoint(&self.id, leg, changes.last_sequence)
                    .map_err(ReplicationError::from)
            })?;

            let documents = changes.entries.len() as u64;
            {
                let mut status = self.shared.status.write();
                status.documents_processed += documents;
                status.batches_completed += 1;
                status.conflicts_detected += outcome.new_conflicts.len() as u64;
            }
            tracing::debug!(
                replication = %self.id,
                direction = %leg,
                documents,
                inserted = outcome.inserted,
                checkpoint = changes.last_sequence,
                "replication batch applied"
            );
            self.shared.emit(ReplicationEvent::BatchCompleted {
                direction: leg,
                documents,
                checkpoint: changes.last_sequence,
            });

            if changes.entries.len() < batch_size {
                return Ok(());
            }
        }
    }

    fn with_retry<T>(
        &self,
        mut step: impl FnMut() -> ReplicationResult<T>,
    ) -> ReplicationResult<T> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            match step() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        replication = %self.id,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "replication step failed, retrying"
                    );
                    thread::sleep(delay);
                    if self.shared.stop_requested() {
                        return Err(ReplicationError::Cancelled);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Copies the revisions named in `changes` that `target` lacks.
fn transfer(
    source: &dyn ReplicationPeer,
    target: &dyn ReplicationPeer,
    changes: &Changes,
) -> ReplicationResult<InsertOutcome> {
    let wanted: BTreeMap<String, Vec<RevisionId>> = changes
        .entries
        .iter()
        .map(|e| (e.doc_id.clone(), e.leaves.clone()))
        .collect();
    let missing = target.revs_diff(&wanted)?;
    if missing.is_empty() {
        return Ok(InsertOutcome::default());
    }

    let mut histories = Vec::new();
    for (doc_id, revs) in &missing {
        for rev_id in revs {
            histories.push((doc_id.clone(), source.history(doc_id, rev_id)?));
        }
    }
    target.insert_histories(&histories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::Value;
    use std::time::Duration;

    fn datastore(name: &str) -> Arc<Datastore> {
        Arc::new(Datastore::open_in_memory(name).unwrap())
    }

    #[test]
    fn replication_ids_are_stable_and_distinct() {
        let a = replication_id("local", "peer", Direction::Push);
        assert_eq!(a.len(), 64);
        assert_eq!(a, replication_id("local", "peer", Direction::Push));
        assert_ne!(a, replication_id("local", "peer", Direction::Pull));
        assert_ne!(a, replication_id("localp", "eer", Direction::Push));
    }

    struct PanickingPeer;

    impl ReplicationPeer for PanickingPeer {
        fn identifier(&self) -> String {
            "panicking".into()
        }
        fn last_sequence(&self) -> ReplicationResult<revdb_core::Sequence> {
            panic!("peer exploded")
        }
        fn changes_since(&self, _: revdb_core::Sequence, _: usize) -> ReplicationResult<Changes> {
            panic!("peer exploded")
        }
        fn revs_diff(
            &self,
            _: &BTreeMap<String, Vec<RevisionId>>,
        ) -> ReplicationResult<BTreeMap<String, Vec<RevisionId>>> {
            panic!("peer exploded")
        }
        fn history(&self, _: &str, _: &RevisionId) -> ReplicationResult<Vec<revdb_core::Revision>> {
            panic!("peer exploded")
        }
        fn insert_histories(
            &self,
            _: &[(String, Vec<revdb_core::Revision>)],
        ) -> ReplicationResult<InsertOutcome> {
            panic!("peer exploded")
        }
    }

    #[test]
    fn panicked_workers_are_reported_when_joined() {
        let handle = thread::spawn(|| panic!("worker exploded"));
        assert!(!join_worker("test", handle));
        assert!(join_worker("test", thread::spawn(|| ())));
    }

    #[test]
    fn dropping_a_replicator_survives_a_panicked_worker() {
        let local = datastore("local");
        local.save(Some("a"), None, Value::object(), false).unwrap();
        let replicator = Replicator::new(
            Arc::clone(&local),
            Arc::new(PanickingPeer),
            ReplicatorConfig::new(Direction::Push),
        )
        .unwrap();
        replicator.start().unwrap();
        drop(replicator);
        assert_eq!(local.document_count().unwrap(), 1);
    }

    #[test]
    fn push_copies_documents_and_completes() {
        let local = datastore("local");
        let remote = datastore("remote");
        for i in 0..5 {
            local
                .save(Some(&format!("d{i}")), None, Value::object().with("i", i), false)
                .unwrap();
        }

        let replicator = Replicator::new(
            Arc::clone(&local),
            Arc::new(DatastorePeer::new(Arc::clone(&remote))),
            ReplicatorConfig::new(Direction::Push).with_batch_size(2),
        )
        .unwrap();
        let events = replicator.subscribe();
        replicator.start().unwrap();
        let status = replicator.wait();

        assert_eq!(status.state, ReplicationState::Complete);
        assert_eq!(status.documents_processed, 5);
        assert_eq!(status.batches_completed, 3);
        assert_eq!(status.total_estimate, 5);
        assert_eq!(remote.document_count().unwrap(), 5);
        assert_eq!(
            local.checkpoint(replicator.id(), ReplicationDirection::Push),
            Some(5)
        );

        let received: Vec<ReplicationEvent> = events.try_iter().collect();
        assert_eq!(
            received.first(),
            Some(&ReplicationEvent::StateChanged {
                from: ReplicationState::Pending,
                to: ReplicationState::Started
            })
        );
        assert_eq!(
            received.last(),
            Some(&ReplicationEvent::Complete {
                documents_replicated: 5
            })
        );
    }

    #[test]
    fn start_while_running_is_rejected() {
        let local = datastore("local");
        let replicator = Replicator::new(
            Arc::clone(&local),
            Arc::new(DatastorePeer::new(datastore("remote"))),
            ReplicatorConfig::new(Direction::Pull),
        )
        .unwrap();

        replicator.shared.status.write().state = ReplicationState::Started;
        assert!(matches!(
            replicator.start(),
            Err(ReplicationError::InvalidStateTransition { .. })
        ));
        replicator.shared.status.write().state = ReplicationState::Complete;
        replicator.start().unwrap();
        assert_eq!(replicator.wait().state, ReplicationState::Complete);
    }

    #[test]
    fn stop_outside_a_run_does_nothing() {
        let replicator = Replicator::new(
            datastore("local"),
            Arc::new(DatastorePeer::new(datastore("remote"))),
            ReplicatorConfig::new(Direction::Both),
        )
        .unwrap();
        assert_eq!(replicator.stop(), ReplicationState::Pending);
        assert_eq!(replicator.destroy().state, ReplicationState::Pending);
    }

    #[test]
    fn closed_local_datastore_is_rejected() {
        let local = datastore("local");
        local.close();
        let err = Replicator::new(
            local,
            Arc::new(DatastorePeer::new(datastore("remote"))),
            ReplicatorConfig::new(Direction::Push),
        )
        .unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidConfig(_)));
    }

    #[test]
    fn retries_back_off_then_succeed() {
        let config = crate::config::RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false);
        let run = Run {
            id: "r".into(),
            config: ReplicatorConfig::new(Direction::Push).with_retry(config),
            local: DatastorePeer::new(datastore("local")),
            peer: Arc::new(DatastorePeer::new(datastore("remote"))),
            shared: Arc::new(Shared {
                status: RwLock::new(ReplicationStatus::default()),
                stop_requested: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
        };

        let mut calls = 0;
        let value = run
            .with_retry(|| {
                calls += 1;
                if calls < 3 {
                    Err(ReplicationError::peer_retryable("flaky"))
                } else {
                    Ok(calls)
                }
            })
            .unwrap();
        assert_eq!(value, 3);

        let mut calls = 0;
        let err = run
            .with_retry(|| -> ReplicationResult<()> {
                calls += 1;
                Err(ReplicationError::peer_fatal("denied"))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(!err.is_retryable());
    }
}
