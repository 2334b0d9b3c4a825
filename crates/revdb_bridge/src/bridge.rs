//! Command dispatch.

use crate::document::{revision_to_json, DocumentInput, DOC_ID, DOC_REV};
use crate::error::{BridgeError, BridgeResult};
use crate::message::{Action, Command, Responder, ResponseStream};
use crate::resolver::{HostResolver, PendingResolvers};
use revdb_core::{
    Config, Datastore, DatastoreManager, EncryptionKey, Query, RevisionSelector, Value,
};
use revdb_replication::{
    is_remote_endpoint, DatastorePeer, Direction, HttpClient, RemotePeer, ReplicationError,
    ReplicationEvent, ReplicationPeer, ReplicationStatus, ReplicatorConfig, ReplicatorRegistry,
};
use serde_json::{json, Value as JsonValue};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Executes host commands against a [`DatastoreManager`].
///
/// Every command gets its own response stream. Most commands answer once;
/// `createReplicator` keeps its stream open for replication events and
/// `resolveConflictsForDocument` for the resolution handshake.
pub struct Bridge {
    manager: Arc<DatastoreManager>,
    replicators: ReplicatorRegistry,
    resolvers: Arc<PendingResolvers>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl Bridge {
    /// Creates a bridge over a manager.
    pub fn new(manager: DatastoreManager) -> Self {
        Self {
            manager: Arc::new(manager),
            replicators: ReplicatorRegistry::new(),
            resolvers: Arc::new(PendingResolvers::default()),
            http_client: None,
        }
    }

    /// Lets `createReplicator` reach remote datastores given as http or
    /// https URLs.
    #[must_use]
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Creates a bridge whose datastores live under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: &Path) -> BridgeResult<Self> {
        Ok(Self::new(DatastoreManager::open(root, Config::default())?))
    }

    /// Creates a bridge over in-memory datastores.
    pub fn in_memory() -> Self {
        Self::new(DatastoreManager::in_memory())
    }

    /// Returns the manager.
    pub fn manager(&self) -> &Arc<DatastoreManager> {
        &self.manager
    }

    /// Returns the replicator registry.
    pub fn replicators(&self) -> &ReplicatorRegistry {
        &self.replicators
    }

    /// Runs a command and returns the stream its responses arrive on.
    ///
    /// The last response on the stream has `keep_callback == false`.
    pub fn dispatch(&self, command: Command) -> ResponseStream {
        let (tx, rx) = mpsc::channel();
        let responder = Responder::new(command.token, tx);
        tracing::debug!(token = command.token, action = %command.action, "dispatching command");

        let action = match command.action.parse::<Action>() {
            Ok(action) => action,
            Err(err) => {
                responder.finish(Err(err));
                return rx;
            }
        };

        let args = &command.args;
        match action {
            Action::CreateReplicator => self.create_replicator(args, responder),
            Action::ResolveConflictsForDocument => self.resolve_conflicts(args, responder),
            other => responder.finish(self.call(other, args)),
        }
        rx
    }

    fn call(&self, action: Action, args: &[JsonValue]) -> BridgeResult<JsonValue> {
        match action {
            Action::OpenDatastore => {
                let name = arg_str(args, 0, "datastore name")?;
                match encryption_key(name, args.get(1))? {
                    Some(key) => self.manager.open_encrypted_datastore(name, key)?,
                    None => self.manager.open_datastore(name)?,
                };
                Ok(json!({ "name": name }))
            }
            Action::DeleteDatastore => {
                self.manager.delete_datastore(arg_str(args, 0, "datastore name")?)?;
                Ok(JsonValue::Null)
            }
            Action::CreateOrUpdateDocumentFromRevision => {
                let ds = self.datastore(args)?;
                let doc = DocumentInput::from_json(arg(args, 1, "document")?)?;
                let saved = ds.save_with_attachments(
                    doc.id.as_deref(),
                    doc.rev.as_ref(),
                    doc.body,
                    doc.attachments,
                    doc.deleted,
                )?;
                Ok(revision_to_json(&saved))
            }
            Action::GetDocument => {
                let ds = self.datastore(args)?;
                let doc_id = arg_str(args, 1, "document id")?;
                Ok(revision_to_json(&ds.get(doc_id, RevisionSelector::Current)?))
            }
            Action::DeleteDocumentFromRevision => {
                let ds = self.datastore(args)?;
                let doc = DocumentInput::from_json(arg(args, 1, "document")?)?;
                let doc_id = doc
                    .id
                    .ok_or_else(|| BridgeError::invalid_argument(format!("{DOC_ID} is required")))?;
                let rev = doc
                    .rev
                    .ok_or_else(|| BridgeError::invalid_argument(format!("{DOC_REV} is required")))?;
                Ok(revision_to_json(&ds.delete(&doc_id, &rev)?))
            }
            Action::EnsureIndexed => {
                let ds = self.datastore(args)?;
                let index = arg_str(args, 1, "index name")?;
                let fields: Vec<&str> = arg(args, 2, "index fields")?
                    .as_array()
                    .ok_or_else(|| BridgeError::invalid_argument("index fields must be an array"))?
                    .iter()
                    .map(|f| {
                        f.as_str().ok_or_else(|| {
                            BridgeError::invalid_argument("index fields must be strings")
                        })
                    })
                    .collect::<BridgeResult<_>>()?;
                Ok(JsonValue::String(ds.ensure_indexed(&fields, index)?))
            }
            Action::DeleteIndexNamed => {
                let ds = self.datastore(args)?;
                ds.delete_index(arg_str(args, 1, "index name")?)?;
                Ok(JsonValue::Bool(true))
            }
            Action::Find => {
                let ds = self.datastore(args)?;
                let query = parse_query(arg(args, 1, "query")?)?;
                let result = ds.find(&query)?;
                Ok(JsonValue::Array(result.iter().map(|r| revision_to_json(&r)).collect()))
            }
            Action::DestroyReplicator => {
                self.replicators.destroy(arg_token(args, 0)?)?;
                Ok(JsonValue::Null)
            }
            Action::StartReplication => {
                self.replicators.get(arg_token(args, 0)?)?.start()?;
                Ok(JsonValue::Null)
            }
            Action::StopReplication => {
                let state = self.replicators.get(arg_token(args, 0)?)?.stop();
                Ok(JsonValue::String(state.as_str().to_string()))
            }
            Action::GetReplicationStatus => {
                let status = self.replicators.get(arg_token(args, 0)?)?.status();
                Ok(status_to_json(&status))
            }
            Action::GetConflictedDocumentIds => {
                let ds = self.datastore(args)?;
                Ok(json!(ds.conflicted_document_ids()?))
            }
            Action::ReturnResolvedDocument => {
                let decision = match arg(args, 0, "resolved document")? {
                    JsonValue::Null => None,
                    doc => Some(doc.clone()),
                };
                self.resolvers
                    .complete(arg_str(args, 1, "resolver id")?, decision)?;
                Ok(JsonValue::Null)
            }
            Action::CreateReplicator | Action::ResolveConflictsForDocument => Err(
                BridgeError::invalid_argument(format!("{action} answers on a stream")),
            ),
        }
    }

    fn datastore(&self, args: &[JsonValue]) -> BridgeResult<Arc<Datastore>> {
        Ok(self.manager.get_datastore(arg_str(args, 0, "datastore name")?)?)
    }

    /// Resolves the other side of a replication: a URL goes through the
    /// HTTP client, anything else names a local datastore.
    fn peer(&self, endpoint: &str) -> BridgeResult<Arc<dyn ReplicationPeer>> {
        if !is_remote_endpoint(endpoint) {
            let datastore = self.manager.get_datastore(endpoint)?;
            return Ok(Arc::new(DatastorePeer::new(datastore)));
        }
        let client = self.http_client.as_ref().ok_or_else(|| {
            BridgeError::invalid_argument(format!(
                "cannot replicate with {endpoint}: no HTTP client is configured"
            ))
        })?;
        Ok(Arc::new(RemotePeer::new(endpoint, Arc::clone(client))?))
    }

    fn create_replicator(&self, args: &[JsonValue], responder: Responder) {
        let created = (|| -> BridgeResult<u64> {
            let local = self.datastore(args)?;
            let peer = self.peer(arg_str(args, 1, "peer datastore")?)?;
            let direction: Direction = arg_str(args, 2, "replication type")?.parse()?;
            let token = arg_token(args, 3)?;
            self.replicators
                .create_with_token(token, local, peer, ReplicatorConfig::new(direction))?;
            Ok(token)
        })();
        let token = match created {
            Ok(token) => token,
            Err(err) => return responder.finish(Err(err)),
        };

        let events = match self.replicators.get(token) {
            Ok(replicator) => replicator.subscribe(),
            Err(err) => return responder.finish(Err(err.into())),
        };
        responder.keep(JsonValue::Null);

        let fallback = responder.clone();
        let forwarder = thread::Builder::new()
            .name(format!("revdb-bridge-events-{token}"))
            .spawn(move || {
                // Ends once the replicator is destroyed and its senders drop.
                for event in events {
                    match event {
                        ReplicationEvent::Complete {
                            documents_replicated,
                        } => responder.keep(json!(["complete", documents_replicated])),
                        ReplicationEvent::Error { message } => {
                            responder.keep(json!(["error", message]));
                        }
                        ReplicationEvent::StateChanged { .. }
                        | ReplicationEvent::BatchCompleted { .. } => {}
                    }
                }
                responder.finish(Ok(JsonValue::Null));
            });
        if let Err(err) = forwarder {
            let _ = self.replicators.destroy(token);
            fallback.finish(Err(ReplicationError::Worker(err.to_string()).into()));
        }
    }

    fn resolve_conflicts(&self, args: &[JsonValue], responder: Responder) {
        let target = (|| -> BridgeResult<(Arc<Datastore>, String)> {
            let ds = self.datastore(args)?;
            let doc_id = arg_str(args, 1, "document id")?.to_string();
            Ok((ds, doc_id))
        })();
        let (ds, doc_id) = match target {
            Ok(target) => target,
            Err(err) => return responder.finish(Err(err)),
        };

        let (resolver_id, decisions) = self.resolvers.register();
        let resolvers = Arc::clone(&self.resolvers);
        let fallback = responder.clone();
        let worker = thread::Builder::new()
            .name(format!("revdb-bridge-resolve-{resolver_id}"))
            .spawn(move || {
                let resolver = HostResolver::new(resolver_id.clone(), &responder, decisions);
                let outcome = ds.resolve_with(&doc_id, &resolver);
                if !resolver.was_asked() {
                    resolvers.cancel(&resolver_id);
                }
                let result = match (outcome, resolver.take_rejection()) {
                    (_, Some(rejection)) => Err(rejection),
                    (Ok(Some(current)), None) => Ok(revision_to_json(&current)),
                    (Ok(None), None) => Ok(JsonValue::Null),
                    (Err(err), None) => Err(err.into()),
                };
                drop(resolver);
                responder.finish(result);
            });
        if let Err(err) = worker {
            fallback.finish(Err(BridgeError::invalid_argument(format!(
                "cannot start resolver: {err}"
            ))));
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("manager", &self.manager)
            .field("replicators", &self.replicators.tokens())
            .field("pending_resolvers", &self.resolvers.len())
            .field("http_client", &self.http_client.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let cancelled = self.resolvers.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled pending conflict resolutions");
        }
        self.replicators.destroy_all();
    }
}

fn arg<'a>(args: &'a [JsonValue], index: usize, what: &str) -> BridgeResult<&'a JsonValue> {
    args.get(index)
        .ok_or_else(|| BridgeError::invalid_argument(format!("missing {what} (argument {index})")))
}

fn arg_str<'a>(args: &'a [JsonValue], index: usize, what: &str) -> BridgeResult<&'a str> {
    arg(args, index, what)?
        .as_str()
        .ok_or_else(|| BridgeError::invalid_argument(format!("{what} must be a string")))
}

fn arg_token(args: &[JsonValue], index: usize) -> BridgeResult<u64> {
    arg(args, index, "replicator token")?
        .as_u64()
        .ok_or_else(|| BridgeError::invalid_argument("replicator token must be a non-negative integer"))
}

/// Reads the optional `{password, identifier}` key options of
/// `openDatastore`. The identifier salts the derivation and defaults to the
/// datastore name.
fn encryption_key(
    name: &str,
    options: Option<&JsonValue>,
) -> BridgeResult<Option<EncryptionKey>> {
    let options = match options {
        None | Some(JsonValue::Null) => return Ok(None),
        Some(JsonValue::Object(options)) => options,
        Some(_) => {
            return Err(BridgeError::invalid_argument(
                "encryption options must be an object",
            ))
        }
    };
    let password = options
        .get("password")
        .and_then(JsonValue::as_str)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| BridgeError::invalid_argument("encryption options need a password"))?;
    let identifier = match options.get("identifier") {
        None | Some(JsonValue::Null) => name,
        Some(JsonValue::String(id)) => id.as_str(),
        Some(_) => return Err(BridgeError::invalid_argument("identifier must be a string")),
    };
    Ok(Some(EncryptionKey::derive_from_password(
        password.as_bytes(),
        identifier.as_bytes(),
    )?))
}

fn status_to_json(status: &ReplicationStatus) -> JsonValue {
    json!({
        "state": status.state.as_str(),
        "lastError": status.last_error,
        "documentsProcessed": status.documents_processed,
        "batchesCompleted": status.batches_completed,
        "totalEstimate": status.total_estimate,
        "conflictsDetected": status.conflicts_detected,
    })
}

/// Accepts either a full query object (with a `selector` key) or a bare
/// selector.
fn parse_query(json: &JsonValue) -> BridgeResult<Query> {
    let value = Value::from(json.clone());
    let query = match json.get("selector") {
        Some(_) => Query::from_value(&value)?,
        None => Query::parse(&value)?,
    };
    Ok(query)
}
