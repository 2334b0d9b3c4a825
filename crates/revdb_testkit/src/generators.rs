//! Property-based test generators using proptest.
//!
//! Provides strategies for generating document ids, bodies and edit
//! sequences that respect the datastore's input rules.

use proptest::prelude::*;
use revdb_core::Value;

/// Strategy for generating valid document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,11}").expect("Invalid regex")
}

/// Strategy for generating valid datastore names.
pub fn datastore_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9_-]{1,32}").expect("Invalid regex")
}

/// Strategy for generating scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
    ]
}

/// Strategy for generating arbitrary nested values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Strategy for generating document bodies (objects without reserved
/// fields).
pub fn body_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z][a-z0-9]{0,7}", value_strategy(), 0..6)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

/// One step of a generated editing session.
#[derive(Debug, Clone)]
pub enum EditOp {
    /// Save a new revision on top of the document's current revision,
    /// creating the document if needed.
    Save {
        /// Index into the session's document id pool.
        doc: usize,
        /// New body.
        body: Value,
    },
    /// Delete the document's current revision.
    Delete {
        /// Index into the session's document id pool.
        doc: usize,
    },
    /// Graft a sibling of the current revision, as a diverged replica
    /// would.
    Branch {
        /// Index into the session's document id pool.
        doc: usize,
        /// Body of the sibling.
        body: Value,
    },
}

/// Strategy for generating edit operations over `docs` documents.
pub fn edit_op_strategy(docs: usize) -> impl Strategy<Value = EditOp> {
    prop_oneof![
        4 => (0..docs, body_strategy()).prop_map(|(doc, body)| EditOp::Save { doc, body }),
        1 => (0..docs).prop_map(|doc| EditOp::Delete { doc }),
        2 => (0..docs, body_strategy()).prop_map(|(doc, body)| EditOp::Branch { doc, body }),
    ]
}

/// Strategy for generating a sequence of edit operations.
pub fn edit_sequence_strategy(
    docs: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<EditOp>> {
    prop::collection::vec(edit_op_strategy(docs), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn doc_ids_are_non_empty(id in doc_id_strategy()) {
            prop_assert!(!id.is_empty());
        }

        #[test]
        fn datastore_names_validate(name in datastore_name_strategy()) {
            prop_assert!(revdb_core::validate_name(&name).is_ok());
        }

        #[test]
        fn bodies_are_objects_without_reserved_fields(body in body_strategy()) {
            let fields = body.as_object().unwrap();
            prop_assert!(fields.iter().all(|(k, _)| !k.starts_with('_')));
        }

        #[test]
        fn values_collate_reflexively(v in value_strategy()) {
            prop_assert_eq!(v.collate(&v), std::cmp::Ordering::Equal);
        }
    }
}
