//! Dotted-path evaluation of filters and sorts over JSON documents.
//!
//! Mirrors the `PostgreSQL` semantics used by the view store: exact
//! matches compare JSON values, `contains` is a case-insensitive substring
//! test on strings, and documents missing the sort field order last.

use std::cmp::Ordering;

use fleetgen_types::{FieldPredicate, Filter, Matcher, Sort};
use serde_json::Value;

use crate::view_store::Document;

/// Look up a dotted path such as `metadata.updatedAt`.
pub fn lookup<'a>(document: &'a Document, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.').filter(|s| !s.is_empty());
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Whether `document` satisfies every predicate of `filter`.
pub fn matches(document: &Document, filter: &Filter) -> bool {
    filter
        .predicates
        .iter()
        .all(|predicate| predicate_matches(document, predicate))
}

fn predicate_matches(document: &Document, predicate: &FieldPredicate) -> bool {
    let Some(value) = lookup(document, &predicate.field) else {
        return false;
    };
    match &predicate.matcher {
        Matcher::Exact(expected) => json_eq(value, expected),
        Matcher::Contains(needle) => value
            .as_str()
            .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
    }
}

/// JSON equality that treats `2010` and `2010.0` as the same number.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y) == Ordering::Equal,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Order two documents by `sort`, missing fields last in both directions.
pub fn compare(a: &Document, b: &Document, sort: &Sort) -> Ordering {
    match (lookup(a, &sort.field), lookup(b, &sort.field)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ordering = compare_values(x, y);
            if sort.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        }
    }
}

/// Rank of a JSON type when values of different types are compared.
const fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
