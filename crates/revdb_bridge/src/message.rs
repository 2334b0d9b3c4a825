//! Commands, responses and the per-command response channel.

use crate::error::{BridgeError, BridgeResult, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{Receiver, Sender};

/// A request from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Host-chosen token; every response to this command carries it.
    pub token: u64,
    /// Action name, e.g. `getDocument`.
    pub action: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

impl Command {
    /// Creates a command.
    pub fn new(token: u64, action: impl Into<String>, args: Vec<JsonValue>) -> Self {
        Self {
            token,
            action: action.into(),
            args,
        }
    }
}

/// An error reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl From<&BridgeError> for Failure {
    fn from(err: &BridgeError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// One reply on a command's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Token of the command this answers.
    pub token: u64,
    /// Payload or error.
    pub result: Result<JsonValue, Failure>,
    /// True if more responses will follow on this token.
    pub keep_callback: bool,
}

impl Response {
    /// Returns the payload of a successful response.
    pub fn payload(&self) -> Option<&JsonValue> {
        self.result.as_ref().ok()
    }

    /// Returns the error code of a failed response.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.result.as_ref().err().map(|f| f.code)
    }
}

/// Receives the responses to one command, in the order they were sent.
pub type ResponseStream = Receiver<Response>;

/// Sends the responses for one token.
#[derive(Debug, Clone)]
pub(crate) struct Responder {
    token: u64,
    tx: Sender<Response>,
}

impl Responder {
    pub(crate) fn new(token: u64, tx: Sender<Response>) -> Self {
        Self { token, tx }
    }

    fn send(&self, result: Result<JsonValue, Failure>, keep_callback: bool) {
        let response = Response {
            token: self.token,
            result,
            keep_callback,
        };
        if self.tx.send(response).is_err() {
            tracing::debug!(token = self.token, "response stream dropped by host");
        }
    }

    /// Sends an intermediate payload.
    pub(crate) fn keep(&self, payload: JsonValue) {
        self.send(Ok(payload), true);
    }

    /// Sends the last response on this token.
    pub(crate) fn finish(self, result: BridgeResult<JsonValue>) {
        let result = result.map_err(|err| {
            tracing::debug!(token = self.token, code = %err.code(), error = %err, "command failed");
            Failure::from(&err)
        });
        self.send(result, false);
    }
}

/// Actions understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Open or create a datastore.
    OpenDatastore,
    /// Delete a datastore and its files.
    DeleteDatastore,
    /// Save a document revision.
    CreateOrUpdateDocumentFromRevision,
    /// Read the current revision of a document.
    GetDocument,
    /// Store a tombstone on a revision.
    DeleteDocumentFromRevision,
    /// Define an index.
    EnsureIndexed,
    /// Drop an index.
    DeleteIndexNamed,
    /// Run a query.
    Find,
    /// Create a replicator between two datastores.
    CreateReplicator,
    /// Destroy a replicator.
    DestroyReplicator,
    /// Start a replicator.
    StartReplication,
    /// Stop a replicator.
    StopReplication,
    /// Read a replicator's state.
    GetReplicationStatus,
    /// List conflicted documents.
    GetConflictedDocumentIds,
    /// Begin host-driven conflict resolution.
    ResolveConflictsForDocument,
    /// Answer a pending conflict resolution.
    ReturnResolvedDocument,
}

impl Action {
    /// Every action, in table order.
    pub const ALL: [Action; 16] = [
        Action::OpenDatastore,
        Action::DeleteDatastore,
        Action::CreateOrUpdateDocumentFromRevision,
        Action::GetDocument,
        Action::DeleteDocumentFromRevision,
        Action::EnsureIndexed,
        Action::DeleteIndexNamed,
        Action::Find,
        Action::CreateReplicator,
        Action::DestroyReplicator,
        Action::StartReplication,
        Action::StopReplication,
        Action::GetReplicationStatus,
        Action::GetConflictedDocumentIds,
        Action::ResolveConflictsForDocument,
        Action::ReturnResolvedDocument,
    ];

    /// Returns the wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::OpenDatastore => "openDatastore",
            Action::DeleteDatastore => "deleteDatastore",
            Action::CreateOrUpdateDocumentFromRevision => "createOrUpdateDocumentFromRevision",
            Action::GetDocument => "getDocument",
            Action::DeleteDocumentFromRevision => "deleteDocumentFromRevision",
            Action::EnsureIndexed => "ensureIndexed",
            Action::DeleteIndexNamed => "deleteIndexNamed",
            Action::Find => "find",
            Action::CreateReplicator => "createReplicator",
            Action::DestroyReplicator => "destroyReplicator",
            Action::StartReplication => "startReplication",
            Action::StopReplication => "stopReplication",
            Action::GetReplicationStatus => "getReplicationStatus",
            Action::GetConflictedDocumentIds => "getConflictedDocumentIds",
            Action::ResolveConflictsForDocument => "resolveConflictsForDocument",
            Action::ReturnResolvedDocument => "returnResolvedDocument",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| BridgeError::UnknownAction(s.to_string()))
    }
}
