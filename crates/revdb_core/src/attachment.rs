//! Binary attachments.
//!
//! Every revision carries the complete set of its attachments by name. A
//! write that names no attachments stores a revision without any, and
//! tombstones never have attachments.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attachments of one revision, by name.
pub type Attachments = BTreeMap<String, Attachment>;

/// A named binary blob stored with a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type, for example `image/png`.
    pub content_type: String,
    /// Raw content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment.
    pub fn new(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Returns the content length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for empty content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub(crate) fn validate_attachments(attachments: &Attachments) -> CoreResult<()> {
    for (name, attachment) in attachments {
        if name.is_empty() {
            return Err(CoreError::invalid_argument("attachment name must not be empty"));
        }
        if attachment.content_type.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "attachment {name} has no content type"
            )));
        }
    }
    Ok(())
}
