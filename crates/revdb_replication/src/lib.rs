//! # RevDB Replication
//!
//! Replicator state machine and peers for RevDB.
//!
//! This crate provides:
//! - Replicator lifecycle (pending → started → complete / error / stopped)
//! - Push, pull and bidirectional replication in batches
//! - Checkpoints persisted in the local datastore after every batch
//! - Retry with exponential backoff
//! - A peer abstraction with an in-process datastore implementation
//! - A remote peer over a pluggable HTTP client, with CBOR bodies
//! - A token registry for hosts that address replicators by number
//!
//! ## Architecture
//!
//! A run moves revisions from a source to a target one batch at a time:
//! 1. Read up to `batch_size` changed documents from the source
//! 2. Ask the target which of their leaf revisions it lacks
//! 3. Copy the full history of every missing leaf
//! 4. Persist the source sequence reached as the checkpoint
//!
//! Bidirectional replication runs the pull leg first, then the push leg,
//! each with its own checkpoint.
//!
//! ## Key Invariants
//!
//! - A checkpoint never runs ahead of the revisions applied at the target
//! - Inserting a revision the target already has is a no-op
//! - Stopping takes effect at a batch boundary
//! - A restarted replicator resumes from its checkpoints

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod peer;
mod registry;
mod replicator;
mod state;

pub use config::{Direction, ReplicatorConfig, RetryConfig};
pub use error::{ReplicationError, ReplicationResult};
pub use http::{
    is_remote_endpoint, HttpClient, LoopbackClient, LoopbackServer, PeerService, RemotePeer,
};
pub use peer::{DatastorePeer, ReplicationPeer};
pub use registry::ReplicatorRegistry;
pub use replicator::{replication_id, Replicator, StopHandle};
pub use state::{ReplicationEvent, ReplicationState, ReplicationStatus};
