//! Secondary indexes over document fields.
//!
//! An index is declared by name over an ordered list of field paths. The
//! engine keeps it in step with the winning revision of every live
//! document, and the query planner uses it to narrow candidates when a
//! selector constrains the index's first field.
//!
//! Definitions are written to the revision log; entries are rebuilt from
//! the documents when a datastore opens.

mod engine;

pub(crate) use engine::{IndexEngine, KeyRange};

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A named index over one or more field paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name, unique per datastore.
    pub name: String,
    /// Dotted field paths, in key order.
    pub fields: Vec<String>,
}

impl IndexDefinition {
    /// Creates a validated definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the name or field list is empty, a
    /// field is empty, or a field is listed twice.
    pub fn new(name: impl Into<String>, fields: &[impl AsRef<str>]) -> CoreResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::invalid_argument("index name must not be empty"));
        }
        if fields.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "index {name} needs at least one field"
            )));
        }

        let mut owned: Vec<String> = Vec::with_capacity(fields.len());
        for field in fields {
            let field = field.as_ref();
            if field.is_empty() || field.split('.').any(str::is_empty) {
                return Err(CoreError::invalid_argument(format!(
                    "invalid field {field:?} in index {name}"
                )));
            }
            if owned.iter().any(|f| f == field) {
                return Err(CoreError::invalid_argument(format!(
                    "field {field} listed twice in index {name}"
                )));
            }
            owned.push(field.to_string());
        }

        Ok(Self {
            name,
            fields: owned,
        })
    }

    /// Returns the first field, which drives lookups.
    #[must_use]
    pub fn leading_field(&self) -> &str {
        &self.fields[0]
    }
}

/// One component of an index key.
#[derive(Debug, Clone)]
pub(crate) enum IndexKey {
    Missing,
    Present(Value),
}

impl IndexKey {
    pub(crate) fn extract(body: &Value, field: &str) -> Self {
        body.get_path(field)
            .map_or(Self::Missing, |v| Self::Present(v.clone()))
    }

    pub(crate) fn value(&self) -> Option<&Value> {
        match self {
            Self::Missing => None,
            Self::Present(v) => Some(v),
        }
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Missing, Self::Missing) => Ordering::Equal,
            (Self::Missing, Self::Present(_)) => Ordering::Less,
            (Self::Present(_), Self::Missing) => Ordering::Greater,
            (Self::Present(a), Self::Present(b)) => a.collate(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_validation() {
        assert!(IndexDefinition::new("by_name", &["name"]).is_ok());
        assert!(IndexDefinition::new("", &["name"]).is_err());
        assert!(IndexDefinition::new("i", &[] as &[&str]).is_err());
        assert!(IndexDefinition::new("i", &["a", "a"]).is_err());
        assert!(IndexDefinition::new("i", &["a..b"]).is_err());

        let def = IndexDefinition::new("i", &["address.city", "age"]).unwrap();
        assert_eq!(def.leading_field(), "address.city");
    }

    #[test]
    fn missing_sorts_first() {
        let missing = IndexKey::Missing;
        let null = IndexKey::Present(Value::Null);
        let one = IndexKey::Present(Value::Integer(1));
        assert!(missing < null);
        assert!(null < one);
        assert_eq!(IndexKey::Present(Value::Float(1.0)), one);
    }
}
