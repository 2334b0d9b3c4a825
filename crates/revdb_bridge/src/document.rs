//! Document JSON as exchanged with the host.
//!
//! A document is its body object plus the metadata fields `_id`, `_rev`,
//! `_deleted` and `_attachments`. Attachments travel as
//! `{"<name>": {"content_type": "...", "data": "<base64>"}}`.

use crate::error::{BridgeError, BridgeResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use revdb_core::{Attachment, Attachments, Revision, RevisionId, Value};
use serde_json::{json, Map, Value as JsonValue};

/// Metadata field holding the document id.
pub const DOC_ID: &str = "_id";
/// Metadata field holding the revision id.
pub const DOC_REV: &str = "_rev";
/// Metadata field holding the tombstone flag.
pub const DOC_DELETED: &str = "_deleted";
/// Metadata field holding the attachments.
pub const DOC_ATTACHMENTS: &str = "_attachments";

const CONTENT_TYPE: &str = "content_type";
const DATA: &str = "data";

/// Renders a revision as document JSON.
pub fn revision_to_json(revision: &Revision) -> JsonValue {
    let mut map = match JsonValue::from(revision.body.clone()) {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    };
    map.insert(DOC_ID.into(), JsonValue::String(revision.doc_id.clone()));
    map.insert(DOC_REV.into(), JsonValue::String(revision.rev_id.to_string()));
    map.insert(DOC_DELETED.into(), JsonValue::Bool(revision.deleted));
    if !revision.deleted && !revision.attachments.is_empty() {
        map.insert(DOC_ATTACHMENTS.into(), attachments_to_json(&revision.attachments));
    }
    JsonValue::Object(map)
}

fn attachments_to_json(attachments: &Attachments) -> JsonValue {
    let entries: Map<String, JsonValue> = attachments
        .iter()
        .map(|(name, a)| {
            let entry = json!({ CONTENT_TYPE: a.content_type, DATA: STANDARD.encode(&a.data) });
            (name.clone(), entry)
        })
        .collect();
    JsonValue::Object(entries)
}

fn attachments_from_json(value: &JsonValue) -> BridgeResult<Attachments> {
    let entries = match value {
        JsonValue::Null => return Ok(Attachments::new()),
        JsonValue::Object(entries) => entries,
        _ => {
            return Err(BridgeError::invalid_argument(format!(
                "{DOC_ATTACHMENTS} must be an object"
            )))
        }
    };

    let mut attachments = Attachments::new();
    for (name, entry) in entries {
        let field = |key: &str| {
            entry.get(key).and_then(JsonValue::as_str).ok_or_else(|| {
                BridgeError::invalid_argument(format!("attachment {name} needs a string {key}"))
            })
        };
        let content_type = field(CONTENT_TYPE)?;
        let data = STANDARD.decode(field(DATA)?).map_err(|e| {
            BridgeError::invalid_argument(format!("attachment {name} is not base64: {e}"))
        })?;
        attachments.insert(name.clone(), Attachment::new(content_type, data));
    }
    Ok(attachments)
}

/// A document sent by the host, split into metadata and body.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInput {
    /// `_id`, if given.
    pub id: Option<String>,
    /// `_rev`, if given.
    pub rev: Option<RevisionId>,
    /// `_deleted`, false if absent.
    pub deleted: bool,
    /// `_attachments`, empty if absent.
    pub attachments: Attachments,
    /// Every other field.
    pub body: Value,
}

impl DocumentInput {
    /// Parses document JSON.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the document is not an object, a
    /// metadata field has the wrong type or attachment data is not base64.
    pub fn from_json(json: &JsonValue) -> BridgeResult<Self> {
        let fields = json
            .as_object()
            .ok_or_else(|| BridgeError::invalid_argument("document must be a JSON object"))?;

        let mut input = Self {
            id: None,
            rev: None,
            deleted: false,
            attachments: Attachments::new(),
            body: Value::object(),
        };
        let mut body = Map::new();
        for (key, value) in fields {
            match key.as_str() {
                DOC_ID => input.id = optional_string(key, value)?,
                DOC_REV => {
                    input.rev = optional_string(key, value)?
                        .map(|s| s.parse::<RevisionId>())
                        .transpose()?;
                }
                DOC_DELETED => {
                    input.deleted = match value {
                        JsonValue::Null => false,
                        JsonValue::Bool(b) => *b,
                        _ => {
                            return Err(BridgeError::invalid_argument(
                                "_deleted must be a boolean",
                            ))
                        }
                    };
                }
                DOC_ATTACHMENTS => input.attachments = attachments_from_json(value)?,
                _ => {
                    body.insert(key.clone(), value.clone());
                }
            }
        }
        input.body = Value::from(JsonValue::Object(body));
        Ok(input)
    }
}

fn optional_string(key: &str, value: &JsonValue) -> BridgeResult<Option<String>> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Ok(Some(s.clone())),
        _ => Err(BridgeError::invalid_argument(format!("{key} must be a string"))),
    }
}
