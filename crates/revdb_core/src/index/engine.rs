//! Index maintenance and lookup.

use crate::error::{CoreError, CoreResult};
use crate::index::{IndexDefinition, IndexKey};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Constraint on an index's leading field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum KeyRange {
    Eq(Value),
    In(Vec<Value>),
    Range {
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
}

#[derive(Debug)]
struct FieldIndex {
    definition: IndexDefinition,
    entries: BTreeMap<Vec<IndexKey>, BTreeSet<String>>,
    keys_by_doc: HashMap<String, Vec<IndexKey>>,
}

impl FieldIndex {
    fn new(definition: IndexDefinition) -> Self {
        Self {
            definition,
            entries: BTreeMap::new(),
            keys_by_doc: HashMap::new(),
        }
    }

    fn remove(&mut self, doc_id: &str) {
        let Some(key) = self.keys_by_doc.remove(doc_id) else {
            return;
        };
        if let Some(docs) = self.entries.get_mut(&key) {
            docs.remove(doc_id);
            if docs.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Indexes `body` under `doc_id`. Documents without the leading field
    /// are left out.
    fn insert(&mut self, doc_id: &str, body: &Value) {
        let key: Vec<IndexKey> = self
            .definition
            .fields
            .iter()
            .map(|f| IndexKey::extract(body, f))
            .collect();
        if key[0].value().is_none() {
            return;
        }
        self.entries
            .entry(key.clone())
            .or_default()
            .insert(doc_id.to_string());
        self.keys_by_doc.insert(doc_id.to_string(), key);
    }

    fn scan(&self, lower: &Bound<Value>, upper: &Bound<Value>, out: &mut BTreeSet<String>) {
        let start = match lower {
            Bound::Included(v) | Bound::Excluded(v) => {
                Bound::Included(vec![IndexKey::Present(v.clone())])
            }
            Bound::Unbounded => Bound::Unbounded,
        };

        for (key, docs) in self.entries.range((start, Bound::Unbounded)) {
            let Some(first) = key[0].value() else {
                continue;
            };
            if let Bound::Excluded(v) = lower {
                if first.collates_equal(v) {
                    continue;
                }
            }
            let past_upper = match upper {
                Bound::Included(v) => first.collate(v).is_gt(),
                Bound::Excluded(v) => first.collate(v).is_ge(),
                Bound::Unbounded => false,
            };
            if past_upper {
                break;
            }
            out.extend(docs.iter().cloned());
        }
    }
}

/// Every index of one datastore.
#[derive(Debug, Default)]
pub(crate) struct IndexEngine {
    indexes: BTreeMap<String, FieldIndex>,
}

impl IndexEngine {
    /// Registers a definition. Returns false if an identical one exists.
    pub(crate) fn define(&mut self, definition: IndexDefinition) -> CoreResult<bool> {
        if let Some(existing) = self.indexes.get(&definition.name) {
            if existing.definition == definition {
                return Ok(false);
            }
            return Err(CoreError::IndexConflict {
                name: definition.name,
                existing: existing.definition.fields.clone(),
            });
        }
        self.indexes
            .insert(definition.name.clone(), FieldIndex::new(definition));
        Ok(true)
    }

    /// Fills an index from the live documents.
    pub(crate) fn build<'a>(&mut self, name: &str, docs: impl Iterator<Item = (&'a str, &'a Value)>) {
        if let Some(index) = self.indexes.get_mut(name) {
            for (doc_id, body) in docs {
                index.insert(doc_id, body);
            }
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub(crate) fn drop_index(&mut self, name: &str) -> bool {
        self.indexes.remove(name).is_some()
    }

    /// Re-indexes one document. `None` removes it from every index.
    pub(crate) fn update_document(&mut self, doc_id: &str, body: Option<&Value>) {
        for index in self.indexes.values_mut() {
            index.remove(doc_id);
            if let Some(body) = body {
                index.insert(doc_id, body);
            }
        }
    }

    pub(crate) fn definitions(&self) -> Vec<IndexDefinition> {
        self.indexes
            .values()
            .map(|i| i.definition.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Returns the first index (by name) whose leading field is `field`.
    pub(crate) fn index_for_field(&self, field: &str) -> Option<&IndexDefinition> {
        self.indexes
            .values()
            .map(|i| &i.definition)
            .find(|d| d.leading_field() == field)
    }

    /// Returns the ids of documents whose leading field satisfies `range`.
    pub(crate) fn lookup(&self, name: &str, range: &KeyRange) -> Option<BTreeSet<String>> {
        let index = self.indexes.get(name)?;
        let mut out = BTreeSet::new();
        match range {
            KeyRange::Eq(v) => {
                index.scan(&Bound::Included(v.clone()), &Bound::Included(v.clone()), &mut out);
            }
            KeyRange::In(values) => {
                for v in values {
                    index.scan(&Bound::Included(v.clone()), &Bound::Included(v.clone()), &mut out);
                }
            }
            KeyRange::Range { lower, upper } => index.scan(lower, upper, &mut out),
        }
        Some(out)
    }

    pub(crate) fn entry_count(&self, name: &str) -> Option<usize> {
        self.indexes.get(name).map(|i| i.keys_by_doc.len())
    }
}
