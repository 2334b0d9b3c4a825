//! Token-addressed replicators.

use crate::config::ReplicatorConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::peer::ReplicationPeer;
use crate::replicator::Replicator;
use crate::state::ReplicationStatus;
use parking_lot::Mutex;
use revdb_core::Datastore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Owns replicators and hands out integer tokens for them.
///
/// Hosts that cannot hold Rust references (scripts, message bridges) address
/// replicators by token. Tokens are never reused within a registry.
#[derive(Debug)]
pub struct ReplicatorRegistry {
    next_token: AtomicU64,
    replicators: Mutex<BTreeMap<u64, Arc<Replicator>>>,
}

impl ReplicatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            replicators: Mutex::new(BTreeMap::new()),
        }
    }

    /// Creates a replicator and returns its token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the replicator cannot be created.
    pub fn create(
        &self,
        local: Arc<Datastore>,
        peer: Arc<dyn ReplicationPeer>,
        config: ReplicatorConfig,
    ) -> ReplicationResult<u64> {
        let replicator = Replicator::new(local, peer, config)?;
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.replicators.lock().insert(token, Arc::new(replicator));
        tracing::debug!(token, "replicator registered");
        Ok(token)
    }

    /// Creates a replicator under a token chosen by the caller.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the token is taken or the replicator
    /// cannot be created.
    pub fn create_with_token(
        &self,
        token: u64,
        local: Arc<Datastore>,
        peer: Arc<dyn ReplicationPeer>,
        config: ReplicatorConfig,
    ) -> ReplicationResult<()> {
        let replicator = Replicator::new(local, peer, config)?;
        let mut replicators = self.replicators.lock();
        if replicators.contains_key(&token) {
            return Err(ReplicationError::InvalidConfig(format!(
                "replicator token {token} is already in use"
            )));
        }
        replicators.insert(token, Arc::new(replicator));
        self.next_token.fetch_max(token + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the replicator registered under `token`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownReplicator` if there is none.
    pub fn get(&self, token: u64) -> ReplicationResult<Arc<Replicator>> {
        self.replicators
            .lock()
            .get(&token)
            .cloned()
            .ok_or(ReplicationError::UnknownReplicator { token })
    }

    /// Stops a replicator, waits for its worker and forgets the token.
    ///
    /// # Errors
    ///
    /// Returns `UnknownReplicator` if there is none.
    pub fn destroy(&self, token: u64) -> ReplicationResult<ReplicationStatus> {
        let replicator = self
            .replicators
            .lock()
            .remove(&token)
            .ok_or(ReplicationError::UnknownReplicator { token })?;
        Ok(replicator.destroy())
    }

    /// Returns the registered tokens in ascending order.
    pub fn tokens(&self) -> Vec<u64> {
        self.replicators.lock().keys().copied().collect()
    }

    /// Stops and forgets every replicator.
    pub fn destroy_all(&self) {
        let replicators = std::mem::take(&mut *self.replicators.lock());
        for replicator in replicators.into_values() {
            replicator.destroy();
        }
    }
}

impl Default for ReplicatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Direction;
    use crate::peer::DatastorePeer;
    use crate::state::ReplicationState;

    fn pair() -> (Arc<Datastore>, Arc<dyn ReplicationPeer>) {
        let local = Arc::new(Datastore::open_in_memory("local").unwrap());
        let remote = Arc::new(Datastore::open_in_memory("remote").unwrap());
        (local, Arc::new(DatastorePeer::new(remote)))
    }

    #[test]
    fn tokens_are_unique_and_resolvable() {
        let registry = ReplicatorRegistry::new();
        let (local, peer) = pair();

        let a = registry
            .create(Arc::clone(&local), Arc::clone(&peer), ReplicatorConfig::new(Direction::Push))
            .unwrap();
        let b = registry
            .create(local, peer, ReplicatorConfig::new(Direction::Pull))
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(registry.tokens(), vec![a, b]);
        assert_eq!(registry.get(b).unwrap().direction(), Direction::Pull);
    }

    #[test]
    fn destroy_forgets_the_token() {
        let registry = ReplicatorRegistry::new();
        let (local, peer) = pair();
        let token = registry
            .create(local, peer, ReplicatorConfig::new(Direction::Both))
            .unwrap();

        let status = registry.destroy(token).unwrap();
        assert_eq!(status.state, ReplicationState::Pending);
        assert!(matches!(
            registry.get(token),
            Err(ReplicationError::UnknownReplicator { token: t }) if t == token
        ));
        assert!(registry.destroy(token).is_err());
    }

    #[test]
    fn explicit_tokens_cannot_collide() {
        let registry = ReplicatorRegistry::new();
        let (local, peer) = pair();
        registry
            .create_with_token(
                10,
                Arc::clone(&local),
                Arc::clone(&peer),
                ReplicatorConfig::new(Direction::Push),
            )
            .unwrap();
        assert!(registry
            .create_with_token(
                10,
                Arc::clone(&local),
                Arc::clone(&peer),
                ReplicatorConfig::new(Direction::Push)
            )
            .is_err());

        let next = registry
            .create(local, peer, ReplicatorConfig::new(Direction::Push))
            .unwrap();
        assert_eq!(next, 11);
    }
}
