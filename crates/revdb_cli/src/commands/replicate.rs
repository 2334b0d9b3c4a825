//! Replicate command implementation.

use revdb_core::DatastoreManager;
use revdb_replication::{
    DatastorePeer, Direction, ReplicationState, ReplicationStatus, Replicator, ReplicatorConfig,
};
use std::path::Path;
use std::sync::Arc;

/// Runs the replicate command and waits for it to finish.
pub fn run(
    path: &Path,
    source: &str,
    target: &str,
    direction: &str,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::open_root(path)?;
    let direction: Direction = direction.parse()?;
    let status = replicate(&manager, source, target, direction, batch_size)?;

    println!("State:      {}", status.state);
    println!("Documents:  {}", status.documents_processed);
    println!("Batches:    {}", status.batches_completed);
    println!("Conflicts:  {}", status.conflicts_detected);

    match status.state {
        ReplicationState::Error => Err(status
            .last_error
            .unwrap_or_else(|| "replication failed".to_string())
            .into()),
        _ => Ok(()),
    }
}

/// Replicates `source` (local) with `target` (peer) and returns the final
/// status.
pub fn replicate(
    manager: &DatastoreManager,
    source: &str,
    target: &str,
    direction: Direction,
    batch_size: usize,
) -> Result<ReplicationStatus, Box<dyn std::error::Error>> {
    let local = manager.get_datastore(source)?;
    let peer = manager.get_datastore(target)?;

    let replicator = Replicator::new(
        local,
        Arc::new(DatastorePeer::new(peer)),
        ReplicatorConfig::new(direction).with_batch_size(batch_size),
    )?;
    replicator.start()?;
    Ok(replicator.wait())
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::{Config, Value};

    #[test]
    fn pushes_between_datastores_under_one_root() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatastoreManager::open(dir.path(), Config::default()).unwrap();
        let a = manager.open_datastore("a").unwrap();
        manager.open_datastore("b").unwrap();
        for i in 0..5 {
            a.save(Some(&format!("d{i}")), None, Value::object().with("i", i), false)
                .unwrap();
        }

        let status = replicate(&manager, "a", "b", Direction::Push, 2).unwrap();
        assert_eq!(status.state, ReplicationState::Complete);
        assert_eq!(status.documents_processed, 5);
        assert_eq!(status.batches_completed, 3);
        assert_eq!(manager.get_datastore("b").unwrap().document_count().unwrap(), 5);

        assert!(replicate(&manager, "a", "b", Direction::Push, 0).is_err());
        assert!(replicate(&manager, "a", "missing", Direction::Pull, 10).is_err());
    }
}
