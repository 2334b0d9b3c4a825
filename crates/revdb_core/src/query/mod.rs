//! Declarative queries over the winning revisions of live documents.
//!
//! A [`Query`] is a [`Selector`] plus optional sort, skip, limit and field
//! projection. Execution picks an access path first: if the selector
//! constrains the leading field of a declared index, only the documents
//! that index returns are examined, otherwise every live document is.
//! Either way each candidate is checked against the full selector, so the
//! plan changes cost, never results.
//!
//! ```rust
//! use revdb_core::{Datastore, Query, SortDirection, Value};
//!
//! let store = Datastore::open_in_memory("people").unwrap();
//! store.save(Some("a"), None, Value::object().with("age", 31), false).unwrap();
//! store.save(Some("b"), None, Value::object().with("age", 17), false).unwrap();
//!
//! let selector = Value::from(serde_json::json!({"age": {"$gte": 18}}));
//! let query = Query::parse(&selector).unwrap().sort("age", SortDirection::Desc);
//! let result = store.find(&query).unwrap();
//! assert_eq!(result.document_ids(), ["a"]);
//! ```

mod result;
mod selector;

pub use result::{QueryIter, QueryResult};
pub use selector::{Condition, Selector};

use crate::error::{CoreError, CoreResult};
use crate::index::IndexEngine;
use crate::revision::RevisionId;
use crate::store::{RevisionStore, RESERVED_FIELDS};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Sort direction of one sort field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    /// Dotted field path.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

/// Access path chosen for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// Candidates come from an index lookup on `field`.
    IndexScan {
        /// Index name.
        index: String,
        /// Leading field the lookup used.
        field: String,
    },
    /// Every live document is examined.
    FullScan,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexScan { index, field } => write!(f, "index scan on {index} ({field})"),
            Self::FullScan => f.write_str("full scan"),
        }
    }
}

/// A query over one datastore.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Documents must match this selector.
    pub selector: Selector,
    /// Sort keys, most significant first. Empty means document id order.
    pub sort: Vec<SortField>,
    /// Number of sorted matches to skip.
    pub skip: usize,
    /// Maximum number of matches to return.
    pub limit: Option<usize>,
    /// Top-level body fields to keep. `None` keeps the whole body.
    pub fields: Option<Vec<String>>,
}

impl Query {
    /// Creates a query for `selector` with no sort, skip, limit or
    /// projection.
    #[must_use]
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            sort: Vec::new(),
            skip: 0,
            limit: None,
            fields: None,
        }
    }

    /// Creates a query matching every live document.
    #[must_use]
    pub fn all() -> Self {
        Self::new(Selector::All)
    }

    /// Creates a query from a selector object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the selector is malformed.
    pub fn parse(selector: &Value) -> CoreResult<Self> {
        Ok(Self::new(Selector::parse(selector)?))
    }

    /// Creates a query from a full query object with `selector`, `sort`,
    /// `skip`, `limit` and `fields` keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if any part is malformed.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let pairs = value
            .as_object()
            .ok_or_else(|| CoreError::invalid_query("query must be an object"))?;

        let mut query = Self::all();
        for (key, arg) in pairs {
            match key.as_str() {
                "selector" => query.selector = Selector::parse(arg)?,
                "sort" => query.sort = parse_sort(arg)?,
                "skip" => query.skip = parse_count("skip", arg)?,
                "limit" => query.limit = Some(parse_count("limit", arg)?),
                "fields" => query.fields = Some(parse_fields(arg)?),
                other => {
                    return Err(CoreError::invalid_query(format!(
                        "unknown query key {other}"
                    )));
                }
            }
        }
        Ok(query)
    }

    /// Adds a sort key.
    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sets the number of matches to skip.
    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the maximum number of matches.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the projected fields.
    #[must_use]
    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }
}

fn parse_sort(arg: &Value) -> CoreResult<Vec<SortField>> {
    let items = arg
        .as_array()
        .ok_or_else(|| CoreError::invalid_query("sort must be an array"))?;

    items
        .iter()
        .map(|item| match item {
            Value::String(field) => Ok(SortField {
                field: field.clone(),
                direction: SortDirection::Asc,
            }),
            Value::Object(pairs) if pairs.len() == 1 => {
                let (field, dir) = &pairs[0];
                let direction = match dir.as_str() {
                    Some("asc") => SortDirection::Asc,
                    Some("desc") => SortDirection::Desc,
                    _ => {
                        return Err(CoreError::invalid_query(format!(
                            "sort direction for {field} must be \"asc\" or \"desc\""
                        )));
                    }
                };
                Ok(SortField {
                    field: field.clone(),
                    direction,
                })
            }
            other => Err(CoreError::invalid_query(format!(
                "invalid sort entry {other}"
            ))),
        })
        .collect()
}

fn parse_count(name: &str, arg: &Value) -> CoreResult<usize> {
    arg.as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CoreError::invalid_query(format!("{name} must be a non-negative integer")))
}

fn parse_fields(arg: &Value) -> CoreResult<Vec<String>> {
    arg.as_array()
        .ok_or_else(|| CoreError::invalid_query("fields must be an array"))?
        .iter()
        .map(|f| {
            f.as_str()
                .map(str::to_string)
                .ok_or_else(|| CoreError::invalid_query("fields must be strings"))
        })
        .collect()
}

/// Chooses the access path for `selector`.
pub(crate) fn plan(selector: &Selector, indexes: &IndexEngine) -> QueryPlan {
    selector
        .key_ranges()
        .into_iter()
        .find_map(|(field, _)| {
            indexes.index_for_field(&field).map(|def| QueryPlan::IndexScan {
                index: def.name.clone(),
                field,
            })
        })
        .unwrap_or(QueryPlan::FullScan)
}

/// A matched document: id, winning revision and body used for sorting.
type Hit<'a> = (&'a str, &'a RevisionId, &'a Value);

/// Runs `query` and returns the matching (document, revision) pairs in
/// result order together with the plan used.
pub(crate) fn execute(
    store: &RevisionStore,
    indexes: &IndexEngine,
    query: &Query,
    scan_warning_threshold: usize,
) -> (Vec<(String, RevisionId)>, QueryPlan) {
    let plan = plan(&query.selector, indexes);

    let candidates: Option<BTreeSet<String>> = match &plan {
        QueryPlan::IndexScan { index, field } => query
            .selector
            .key_ranges()
            .into_iter()
            .find(|(f, _)| f == field)
            .and_then(|(_, range)| indexes.lookup(index, &range)),
        QueryPlan::FullScan => None,
    };

    let mut examined = 0usize;
    let mut hits: Vec<Hit<'_>> = Vec::new();
    let mut consider = |doc_id: &str| {
        let Some(tree) = store.tree(doc_id) else {
            return;
        };
        examined += 1;
        if let (Some(body), Some(rev)) = (tree.live_body(), tree.winner_id()) {
            if query.selector.matches(body) {
                hits.push((tree.doc_id(), rev, body));
            }
        }
    };

    match &candidates {
        Some(ids) => ids.iter().for_each(|id| consider(id)),
        None => store.trees().for_each(|t| consider(t.doc_id())),
    }

    if matches!(plan, QueryPlan::FullScan) && examined > scan_warning_threshold {
        tracing::warn!(
            examined,
            threshold = scan_warning_threshold,
            "query ran a full scan; consider an index on a selector field"
        );
    }
    tracing::debug!(%plan, examined, matched = hits.len(), "query executed");

    if !query.sort.is_empty() {
        hits.sort_by(|a, b| compare_hits(&query.sort, a, b));
    }

    let selected = hits
        .into_iter()
        .skip(query.skip)
        .take(query.limit.unwrap_or(usize::MAX))
        .map(|(doc_id, rev, _)| (doc_id.to_string(), rev.clone()))
        .collect();
    (selected, plan)
}

fn compare_hits(sort: &[SortField], a: &Hit<'_>, b: &Hit<'_>) -> Ordering {
    for key in sort {
        let ord = match (a.2.get_path(&key.field), b.2.get_path(&key.field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.collate(y),
        };
        let ord = match key.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.0.cmp(b.0)
}

/// Drops reserved host fields from a projection list.
pub(crate) fn projection_fields(fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .filter(|f| !RESERVED_FIELDS.contains(&f.as_str()))
        .cloned()
        .collect()
}
