//! Conflict resolution driven by the host.
//!
//! `resolveConflictsForDocument` sends the conflicting revisions to the host
//! under a fresh resolver id and parks a worker until the host answers with
//! `returnResolvedDocument`.

use crate::document::{revision_to_json, DocumentInput};
use crate::error::{BridgeError, BridgeResult};
use crate::message::Responder;
use parking_lot::Mutex;
use revdb_core::{ConflictResolver, Resolution, Revision};
use serde_json::{json, Value as JsonValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// Resolutions waiting for the host, by resolver id.
#[derive(Debug, Default)]
pub(crate) struct PendingResolvers {
    next_id: AtomicU64,
    waiting: Mutex<HashMap<String, Sender<Option<JsonValue>>>>,
}

impl PendingResolvers {
    /// Reserves a resolver id and returns the receiving end of its answer.
    pub(crate) fn register(&self) -> (String, Receiver<Option<JsonValue>>) {
        let id = format!("resolver-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = mpsc::channel();
        self.waiting.lock().insert(id.clone(), tx);
        (id, rx)
    }

    /// Hands the host's answer to the waiting worker.
    pub(crate) fn complete(&self, id: &str, decision: Option<JsonValue>) -> BridgeResult<()> {
        let tx = self
            .waiting
            .lock()
            .remove(id)
            .ok_or_else(|| BridgeError::UnknownResolver(id.to_string()))?;
        tx.send(decision)
            .map_err(|_| BridgeError::UnknownResolver(id.to_string()))
    }

    /// Forgets a resolver id without answering it.
    pub(crate) fn cancel(&self, id: &str) {
        self.waiting.lock().remove(id);
    }

    /// Drops every waiting sender, waking their workers with no answer.
    pub(crate) fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.waiting.lock().drain().collect();
        drained.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting.lock().len()
    }
}

/// A resolver that asks the host over a response stream.
pub(crate) struct HostResolver<'a> {
    resolver_id: String,
    responder: &'a Responder,
    decisions: Receiver<Option<JsonValue>>,
    asked: RefCell<bool>,
    rejected: RefCell<Option<BridgeError>>,
}

impl<'a> HostResolver<'a> {
    pub(crate) fn new(
        resolver_id: String,
        responder: &'a Responder,
        decisions: Receiver<Option<JsonValue>>,
    ) -> Self {
        Self {
            resolver_id,
            responder,
            decisions,
            asked: RefCell::new(false),
            rejected: RefCell::new(None),
        }
    }

    /// Returns true if the host was sent the conflicts.
    pub(crate) fn was_asked(&self) -> bool {
        *self.asked.borrow()
    }

    /// Takes the error raised by an unusable answer, if any.
    pub(crate) fn take_rejection(&self) -> Option<BridgeError> {
        self.rejected.borrow_mut().take()
    }
}

impl ConflictResolver for HostResolver<'_> {
    fn resolve(&self, doc_id: &str, conflicts: &[Revision]) -> Option<Resolution> {
        *self.asked.borrow_mut() = true;
        self.responder.keep(json!({
            "docId": doc_id,
            "resolverId": self.resolver_id,
            "conflicts": conflicts.iter().map(revision_to_json).collect::<Vec<_>>(),
        }));

        let decision = match self.decisions.recv() {
            Ok(decision) => decision?,
            Err(_) => {
                // The bridge was dropped before the host answered.
                *self.rejected.borrow_mut() =
                    Some(BridgeError::Cancelled(self.resolver_id.clone()));
                return None;
            }
        };
        match resolution_from_json(&decision, conflicts) {
            Ok(resolution) => Some(resolution),
            Err(err) => {
                tracing::warn!(doc_id, resolver = %self.resolver_id, error = %err, "unusable resolved document");
                *self.rejected.borrow_mut() = Some(err);
                None
            }
        }
    }
}

/// Turns the document returned by the host into a resolution.
///
/// Returning one of the conflicts unchanged picks it as the winner; any
/// other document is merged onto the current winner, carrying exactly the
/// attachments it lists.
pub(crate) fn resolution_from_json(
    doc: &JsonValue,
    conflicts: &[Revision],
) -> BridgeResult<Resolution> {
    let input = DocumentInput::from_json(doc)?;
    if input.deleted {
        return Err(BridgeError::invalid_argument(
            "a resolved document cannot be a tombstone; return null to skip",
        ));
    }

    let picked = input.rev.as_ref().and_then(|rev| {
        conflicts.iter().find(|c| {
            &c.rev_id == rev && c.body == input.body && c.attachments == input.attachments
        })
    });
    Ok(match picked {
        Some(conflict) => Resolution::PickWinner(conflict.rev_id.clone()),
        None => Resolution::MergeWithAttachments {
            body: input.body,
            attachments: input.attachments,
        },
    })
}
