//! Replication with a datastore behind an HTTP endpoint.
//!
//! The HTTP client is abstracted via a trait so hosts can plug in the
//! library they already ship (reqwest, ureq, a platform stack). Request and
//! response bodies are CBOR.
//!
//! Every response is an envelope that either carries the result or the
//! remote error with its retry flag. Failures of the client itself are
//! treated as network trouble and are always retryable.

use crate::error::{ReplicationError, ReplicationResult};
use crate::peer::ReplicationPeer;
use parking_lot::RwLock;
use revdb_core::{Changes, InsertOutcome, Revision, RevisionId, Sequence};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const LAST_SEQUENCE: &str = "/revdb/last_sequence";
const CHANGES: &str = "/revdb/changes";
const REVS_DIFF: &str = "/revdb/revs_diff";
const HISTORY: &str = "/revdb/history";
const INSERT_HISTORIES: &str = "/revdb/insert_histories";

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        (**self).post(url, body)
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

/// Returns true if `endpoint` names a remote datastore rather than a local
/// one.
pub fn is_remote_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with("http://") || endpoint.starts_with("https://")
}

#[derive(Debug, Serialize, Deserialize)]
enum Reply<T> {
    Ok(T),
    Err { message: String, retryable: bool },
}

#[derive(Debug, Serialize, Deserialize)]
struct ChangesRequest {
    since: Sequence,
    limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryRequest {
    doc_id: String,
    rev_id: RevisionId,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| e.to_string())?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    ciborium::from_reader(bytes).map_err(|e| e.to_string())
}

/// A peer reached over HTTP.
///
/// The peer's identifier is its base URL, so replication ids stay stable
/// across sessions.
pub struct RemotePeer<C: HttpClient> {
    /// Base URL of the remote datastore (e.g., "https://db.example.com/notes").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Whether the last request reached the remote.
    connected: AtomicBool,
    /// Last transport error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> RemotePeer<C> {
    /// Creates a peer for the datastore at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` unless the URL is http or https.
    pub fn new(base_url: impl Into<String>, client: C) -> ReplicationResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !is_remote_endpoint(&base_url) {
            return Err(ReplicationError::InvalidConfig(format!(
                "remote peer URL must be http or https, got {base_url}"
            )));
        }
        Ok(Self {
            base_url,
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns false after a request failed to reach the remote.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn transport_failed(&self, message: String) -> ReplicationError {
        tracing::warn!(url = %self.base_url, error = %message, "remote peer unreachable");
        *self.last_error.write() = Some(message.clone());
        self.connected.store(false, Ordering::SeqCst);
        ReplicationError::peer_retryable(message)
    }

    fn post_cbor<Req, Res>(&self, endpoint: &str, request: &Req) -> ReplicationResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.client.is_healthy() {
            return Err(self.transport_failed(format!("{} is unreachable", self.base_url)));
        }

        let body = encode(request)
            .map_err(|e| ReplicationError::peer_fatal(format!("failed to encode request: {e}")))?;

        let url = format!("{}{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url, body)
            .map_err(|e| self.transport_failed(e))?;

        self.connected.store(true, Ordering::SeqCst);
        *self.last_error.write() = None;

        match decode::<Reply<Res>>(&response) {
            Ok(Reply::Ok(value)) => Ok(value),
            Ok(Reply::Err { message, retryable }) => {
                Err(ReplicationError::Peer { message, retryable })
            }
            Err(e) => Err(ReplicationError::peer_fatal(format!(
                "malformed response from {url}: {e}"
            ))),
        }
    }
}

impl<C: HttpClient> ReplicationPeer for RemotePeer<C> {
    fn identifier(&self) -> String {
        self.base_url.clone()
    }

    fn last_sequence(&self) -> ReplicationResult<Sequence> {
        self.post_cbor(LAST_SEQUENCE, &())
    }

    fn changes_since(&self, since: Sequence, limit: usize) -> ReplicationResult<Changes> {
        self.post_cbor(CHANGES, &ChangesRequest { since, limit })
    }

    fn revs_diff(
        &self,
        revs: &BTreeMap<String, Vec<RevisionId>>,
    ) -> ReplicationResult<BTreeMap<String, Vec<RevisionId>>> {
        self.post_cbor(REVS_DIFF, revs)
    }

    fn history(&self, doc_id: &str, rev_id: &RevisionId) -> ReplicationResult<Vec<Revision>> {
        let request = HistoryRequest {
            doc_id: doc_id.to_string(),
            rev_id: rev_id.clone(),
        };
        self.post_cbor(HISTORY, &request)
    }

    fn insert_histories(
        &self,
        histories: &[(String, Vec<Revision>)],
    ) -> ReplicationResult<InsertOutcome> {
        self.post_cbor(INSERT_HISTORIES, &histories)
    }
}

impl<C: HttpClient> std::fmt::Debug for RemotePeer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePeer")
            .field("base_url", &self.base_url)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// Serves a peer's operations at the paths [`RemotePeer`] posts to.
///
/// Embed it in an HTTP server to expose a datastore for replication.
#[derive(Debug)]
pub struct PeerService<P: ReplicationPeer> {
    peer: P,
}

impl<P: ReplicationPeer> PeerService<P> {
    /// Serves `peer`.
    pub fn new(peer: P) -> Self {
        Self { peer }
    }

    fn serve<Req, Res>(
        body: &[u8],
        op: impl FnOnce(Req) -> ReplicationResult<Res>,
    ) -> Result<Vec<u8>, String>
    where
        Req: DeserializeOwned,
        Res: Serialize,
    {
        let request = decode(body).map_err(|e| format!("malformed request: {e}"))?;
        let reply = match op(request) {
            Ok(value) => Reply::Ok(value),
            Err(err) => Reply::Err {
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        };
        encode(&reply)
    }
}

impl<P: ReplicationPeer> LoopbackServer for PeerService<P> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        match path {
            LAST_SEQUENCE => Self::serve(body, |()| self.peer.last_sequence()),
            CHANGES => Self::serve(body, |r: ChangesRequest| {
                self.peer.changes_since(r.since, r.limit)
            }),
            REVS_DIFF => Self::serve(body, |revs: BTreeMap<String, Vec<RevisionId>>| {
                self.peer.revs_diff(&revs)
            }),
            HISTORY => Self::serve(body, |r: HistoryRequest| {
                self.peer.history(&r.doc_id, &r.rev_id)
            }),
            INSERT_HISTORIES => Self::serve(body, |h: Vec<(String, Vec<Revision>)>| {
                self.peer.insert_histories(&h)
            }),
            other => Err(format!("404 no handler for {other}")),
        }
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/revdb/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
