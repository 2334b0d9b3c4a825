//! Selector parsing and evaluation.
//!
//! Selectors use the familiar Mango shape:
//!
//! ```json
//! { "age": { "$gt": 21 }, "$or": [ { "city": "Oslo" }, { "city": "Bergen" } ] }
//! ```
//!
//! Several keys in one object form an implicit `$and`; `{}` matches every
//! document. Comparison operators only match values of the same type
//! class, so `{"age": {"$gt": 5}}` never matches a string age.

use crate::error::{CoreError, CoreResult};
use crate::index::KeyRange;
use crate::value::Value;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A condition applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value.
    Eq(Value),
    /// Field is missing or differs from the value.
    Ne(Value),
    /// Field is greater than the value.
    Gt(Value),
    /// Field is greater than or equal to the value.
    Gte(Value),
    /// Field is less than the value.
    Lt(Value),
    /// Field is less than or equal to the value.
    Lte(Value),
    /// Field equals one of the values.
    In(Vec<Value>),
    /// Field is missing or equals none of the values.
    Nin(Vec<Value>),
    /// Field presence matches the flag.
    Exists(bool),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        let compare = |v: &Value, accept: fn(std::cmp::Ordering) -> bool| {
            field.is_some_and(|f| f.same_type(v) && accept(f.collate(v)))
        };
        let equals = |v: &Value| field.is_some_and(|f| f.collates_equal(v));

        match self {
            Self::Eq(v) => equals(v),
            Self::Ne(v) => !equals(v),
            Self::Gt(v) => compare(v, std::cmp::Ordering::is_gt),
            Self::Gte(v) => compare(v, std::cmp::Ordering::is_ge),
            Self::Lt(v) => compare(v, std::cmp::Ordering::is_lt),
            Self::Lte(v) => compare(v, std::cmp::Ordering::is_le),
            Self::In(values) => values.iter().any(equals),
            Self::Nin(values) => !values.iter().any(equals),
            Self::Exists(expected) => field.is_some() == *expected,
        }
    }

    fn key_range(&self) -> Option<KeyRange> {
        Some(match self {
            Self::Eq(v) => KeyRange::Eq(v.clone()),
            Self::In(values) => KeyRange::In(values.clone()),
            Self::Gt(v) => KeyRange::Range {
                lower: Bound::Excluded(v.clone()),
                upper: Bound::Unbounded,
            },
            Self::Gte(v) => KeyRange::Range {
                lower: Bound::Included(v.clone()),
                upper: Bound::Unbounded,
            },
            Self::Lt(v) => KeyRange::Range {
                lower: Bound::Unbounded,
                upper: Bound::Excluded(v.clone()),
            },
            Self::Lte(v) => KeyRange::Range {
                lower: Bound::Unbounded,
                upper: Bound::Included(v.clone()),
            },
            Self::Ne(_) | Self::Nin(_) | Self::Exists(_) => return None,
        })
    }
}

/// A parsed selector tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Matches every document.
    All,
    /// A condition on a dotted field path.
    Field {
        /// Dotted path into the body.
        path: String,
        /// Condition the field must meet.
        condition: Condition,
    },
    /// Every child must match.
    And(Vec<Selector>),
    /// At least one child must match.
    Or(Vec<Selector>),
    /// The child must not match.
    Not(Box<Selector>),
}

impl Selector {
    /// Shorthand for a field condition.
    pub fn field(path: impl Into<String>, condition: Condition) -> Self {
        Self::Field {
            path: path.into(),
            condition,
        }
    }

    /// Shorthand for an equality condition.
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(path, Condition::Eq(value.into()))
    }

    /// Parses a selector object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for non-object selectors, unknown operators
    /// and operator arguments of the wrong shape.
    pub fn parse(value: &Value) -> CoreResult<Self> {
        let pairs = value
            .as_object()
            .ok_or_else(|| CoreError::invalid_query("selector must be an object"))?;

        let mut clauses = Vec::with_capacity(pairs.len());
        for (key, arg) in pairs {
            clauses.push(match key.as_str() {
                "$and" => Self::And(parse_list(key, arg)?),
                "$or" => Self::Or(parse_list(key, arg)?),
                "$not" => Self::Not(Box::new(Self::parse(arg)?)),
                op if op.starts_with('$') => {
                    return Err(CoreError::invalid_query(format!("unknown operator {op}")));
                }
                field => parse_field(field, arg)?,
            });
        }
        Ok(combine(clauses))
    }

    /// Returns true if `body` satisfies the selector.
    #[must_use]
    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Field { path, condition } => condition.matches(body.get_path(path)),
            Self::And(children) => children.iter().all(|c| c.matches(body)),
            Self::Or(children) => children.iter().any(|c| c.matches(body)),
            Self::Not(child) => !child.matches(body),
        }
    }

    /// Returns index-usable constraints of the top-level conjunction, in
    /// selector order, one per field.
    pub(crate) fn key_ranges(&self) -> Vec<(String, KeyRange)> {
        let mut order: Vec<String> = Vec::new();
        let mut ranges: BTreeMap<String, KeyRange> = BTreeMap::new();
        self.collect_ranges(&mut order, &mut ranges);
        order
            .into_iter()
            .filter_map(|path| ranges.remove(&path).map(|r| (path, r)))
            .collect()
    }

    fn collect_ranges(&self, order: &mut Vec<String>, ranges: &mut BTreeMap<String, KeyRange>) {
        match self {
            Self::Field { path, condition } => {
                let Some(range) = condition.key_range() else {
                    return;
                };
                match ranges.get_mut(path) {
                    None => {
                        order.push(path.clone());
                        ranges.insert(path.clone(), range);
                    }
                    Some(existing) => merge_range(existing, range),
                }
            }
            Self::And(children) => {
                for child in children {
                    child.collect_ranges(order, ranges);
                }
            }
            Self::All | Self::Or(_) | Self::Not(_) => {}
        }
    }
}

/// Narrows `existing` with `other`. The result may be wider than the exact
/// intersection but never narrower.
fn merge_range(existing: &mut KeyRange, other: KeyRange) {
    match other {
        KeyRange::Eq(_) | KeyRange::In(_) => {
            if matches!(existing, KeyRange::Range { .. }) {
                *existing = other;
            }
        }
        KeyRange::Range {
            lower: new_lower,
            upper: new_upper,
        } => {
            if let KeyRange::Range { lower, upper } = existing {
                if matches!(lower, Bound::Unbounded) {
                    *lower = new_lower;
                }
                if matches!(upper, Bound::Unbounded) {
                    *upper = new_upper;
                }
            }
        }
    }
}

fn combine(mut clauses: Vec<Selector>) -> Selector {
    match clauses.len() {
        0 => Selector::All,
        1 => clauses.remove(0),
        _ => Selector::And(clauses),
    }
}

fn parse_list(op: &str, arg: &Value) -> CoreResult<Vec<Selector>> {
    let items = arg
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| CoreError::invalid_query(format!("{op} needs a non-empty array")))?;
    items.iter().map(Selector::parse).collect()
}

fn parse_field(path: &str, arg: &Value) -> CoreResult<Selector> {
    let Some(pairs) = arg.as_object().filter(|p| !p.is_empty()) else {
        return Ok(Selector::eq(path, arg.clone()));
    };

    let operators = pairs.iter().filter(|(k, _)| k.starts_with('$')).count();
    if operators == 0 {
        let nested = pairs
            .iter()
            .map(|(k, v)| parse_field(&format!("{path}.{k}"), v))
            .collect::<CoreResult<Vec<_>>>()?;
        return Ok(combine(nested));
    }
    if operators != pairs.len() {
        return Err(CoreError::invalid_query(format!(
            "field {path} mixes operators and plain keys"
        )));
    }

    let mut clauses = Vec::with_capacity(pairs.len());
    for (op, v) in pairs {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(v.clone()),
            "$ne" => Condition::Ne(v.clone()),
            "$gt" => Condition::Gt(v.clone()),
            "$gte" => Condition::Gte(v.clone()),
            "$lt" => Condition::Lt(v.clone()),
            "$lte" => Condition::Lte(v.clone()),
            "$in" => Condition::In(array_arg(op, v)?),
            "$nin" => Condition::Nin(array_arg(op, v)?),
            "$exists" => Condition::Exists(v.as_bool().ok_or_else(|| {
                CoreError::invalid_query(format!("$exists on {path} needs a boolean"))
            })?),
            "$not" => {
                clauses.push(Selector::Not(Box::new(parse_field(path, v)?)));
                continue;
            }
            other => {
                return Err(CoreError::invalid_query(format!("unknown operator {other}")));
            }
        };
        clauses.push(Selector::field(path, condition));
    }
    Ok(combine(clauses))
}

fn array_arg(op: &str, v: &Value) -> CoreResult<Vec<Value>> {
    v.as_array()
        .map(<[Value]>::to_vec)
        .ok_or_else(|| CoreError::invalid_query(format!("{op} needs an array")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(json: serde_json::Value) -> CoreResult<Selector> {
        Selector::parse(&Value::from(json))
    }

    fn doc(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = parse(json!({})).unwrap();
        assert_eq!(selector, Selector::All);
        assert!(selector.matches(&doc(json!({"a": 1}))));
    }

    #[test]
    fn implicit_and_of_fields() {
        let selector = parse(json!({"name": "ann", "age": {"$gte": 30}})).unwrap();
        assert!(selector.matches(&doc(json!({"name": "ann", "age": 30}))));
        assert!(!selector.matches(&doc(json!({"name": "ann", "age": 29}))));
        assert!(!selector.matches(&doc(json!({"name": "bob", "age": 40}))));
    }

    #[test]
    fn comparisons_respect_type_class() {
        let selector = parse(json!({"age": {"$gt": 5}})).unwrap();
        assert!(selector.matches(&doc(json!({"age": 5.5}))));
        assert!(!selector.matches(&doc(json!({"age": "7"}))));
        assert!(!selector.matches(&doc(json!({}))));
    }

    #[test]
    fn ne_and_nin_match_missing_fields() {
        let ne = parse(json!({"color": {"$ne": "red"}})).unwrap();
        assert!(ne.matches(&doc(json!({}))));
        assert!(!ne.matches(&doc(json!({"color": "red"}))));

        let nin = parse(json!({"n": {"$nin": [1, 2]}})).unwrap();
        assert!(nin.matches(&doc(json!({"n": 3}))));
        assert!(!nin.matches(&doc(json!({"n": 2.0}))));
    }

    #[test]
    fn logical_operators() {
        let selector = parse(json!({
            "$or": [{"city": "Oslo"}, {"city": {"$in": ["Bergen", "Tromsø"]}}],
            "$not": {"closed": true}
        }))
        .unwrap();
        assert!(selector.matches(&doc(json!({"city": "Bergen"}))));
        assert!(!selector.matches(&doc(json!({"city": "Oslo", "closed": true}))));
        assert!(!selector.matches(&doc(json!({"city": "Paris"}))));
    }

    #[test]
    fn nested_objects_become_paths() {
        let selector = parse(json!({"address": {"city": "Oslo"}})).unwrap();
        assert_eq!(selector, Selector::eq("address.city", "Oslo"));

        let exists = parse(json!({"address.zip": {"$exists": false}})).unwrap();
        assert!(exists.matches(&doc(json!({"address": {"city": "Oslo"}}))));
    }

    #[test]
    fn field_level_not() {
        let selector = parse(json!({"age": {"$not": {"$lt": 18}}})).unwrap();
        assert!(selector.matches(&doc(json!({"age": 20}))));
        assert!(!selector.matches(&doc(json!({"age": 10}))));
    }

    #[test]
    fn invalid_selectors() {
        for bad in [
            json!([]),
            json!({"$where": "x"}),
            json!({"a": {"$regex": "x"}}),
            json!({"a": {"$in": 3}}),
            json!({"a": {"$exists": "yes"}}),
            json!({"$or": []}),
            json!({"a": {"$gt": 1, "b": 2}}),
        ] {
            let err = parse(bad.clone()).unwrap_err();
            assert!(matches!(err, CoreError::InvalidQuery { .. }), "{bad}");
        }
    }

    #[test]
    fn key_ranges_merge_bounds_per_field() {
        let selector = parse(json!({
            "age": {"$gt": 1, "$lt": 9},
            "name": {"$ne": "x"},
            "city": "Oslo"
        }))
        .unwrap();
        let ranges = selector.key_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].0, "age");
        assert_eq!(
            ranges[0].1,
            KeyRange::Range {
                lower: Bound::Excluded(Value::from(1)),
                upper: Bound::Excluded(Value::from(9)),
            }
        );
        assert_eq!(ranges[1], ("city".to_string(), KeyRange::Eq(Value::from("Oslo"))));
    }
}
