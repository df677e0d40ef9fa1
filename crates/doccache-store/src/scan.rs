//! In-process evaluation of a [`ScanRequest`].
//!
//! Shared by the bundled document stores so both answer queries with the
//! same semantics:
//!
//! - a filter on a missing field never matches (not even `!=` / `not-in`);
//! - range operators only match values of the same type class;
//! - an ordered scan skips documents lacking the order field, and breaks
//!   ties by document id in the scan direction;
//! - an unordered scan runs in ascending document-id order;
//! - bounds are applied before `offset`, which is applied before `limit`.

use std::cmp::Ordering;

use crate::paginator::ScanRequest;
use crate::query::{Filter, FilterOperator, SortDirection};
use crate::value::{Document, Value};

/// Evaluate `request` over `(id, document)` pairs.
pub fn execute<I>(documents: I, request: &ScanRequest) -> Vec<(String, Document)>
where
    I: IntoIterator<Item = (String, Document)>,
{
    let mut rows: Vec<(String, Document)> = documents
        .into_iter()
        .filter(|(_, doc)| request.filters.iter().all(|f| matches(doc, f)))
        .collect();

    match &request.order {
        Some(sort) => {
            rows.retain(|(_, doc)| lookup(doc, &sort.property).is_some());
            let desc = sort.direction == SortDirection::Desc;
            rows.sort_by(|(id_a, a), (id_b, b)| {
                let ord = compare_field(a, b, &sort.property)
                    .then_with(|| id_a.cmp(id_b));
                if desc { ord.reverse() } else { ord }
            });

            if let Some(cursor) = &request.start_after {
                rows.retain(|(_, doc)| {
                    position(doc, &sort.property, cursor, desc) == Ordering::Greater
                });
            }
            if let Some(cursor) = &request.end_before {
                rows.retain(|(_, doc)| {
                    position(doc, &sort.property, cursor, desc) == Ordering::Less
                });
            }
        }
        None => rows.sort_by(|(a, _), (b, _)| a.cmp(b)),
    }

    let offset = request.offset.unwrap_or(0);
    let limit = request.limit.unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

/// Whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Filter) -> bool {
    let Some(field) = lookup(doc, &filter.property) else {
        return false;
    };
    let operand = &filter.value;

    match filter.operator {
        FilterOperator::Eq => field.store_eq(operand),
        FilterOperator::NotEq => !field.store_eq(operand),
        FilterOperator::Gt => ranged(field, operand, |o| o == Ordering::Greater),
        FilterOperator::Gte => ranged(field, operand, |o| o != Ordering::Less),
        FilterOperator::Lt => ranged(field, operand, |o| o == Ordering::Less),
        FilterOperator::Lte => ranged(field, operand, |o| o != Ordering::Greater),
        FilterOperator::In => candidates(operand).iter().any(|c| field.store_eq(c)),
        FilterOperator::NotIn => !candidates(operand).iter().any(|c| field.store_eq(c)),
        FilterOperator::ArrayContains => field
            .as_array()
            .is_some_and(|items| items.iter().any(|item| item.store_eq(operand))),
        FilterOperator::ArrayContainsAny => field.as_array().is_some_and(|items| {
            candidates(operand)
                .iter()
                .any(|c| items.iter().any(|item| item.store_eq(c)))
        }),
    }
}

fn ranged(field: &Value, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    field.same_type_class(operand) && accept(field.total_cmp(operand))
}

fn candidates(operand: &Value) -> &[Value] {
    operand.as_array().unwrap_or(&[])
}

/// Resolve a dotted property path inside a document.
fn lookup<'a>(doc: &'a Document, property: &str) -> Option<&'a Value> {
    let (head, rest) = match property.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (property, None),
    };
    let root = doc.get(head)?;
    match rest {
        Some(rest) => root.get_path(rest),
        None => Some(root),
    }
}

fn compare_field(a: &Document, b: &Document, property: &str) -> Ordering {
    match (lookup(a, property), lookup(b, property)) {
        (Some(x), Some(y)) => x.total_cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Where `doc` sits relative to `cursor` in scan order.
fn position(doc: &Document, property: &str, cursor: &Value, desc: bool) -> Ordering {
    let ord = lookup(doc, property)
        .map(|v| v.total_cmp(cursor))
        .unwrap_or(Ordering::Less);
    if desc { ord.reverse() } else { ord }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Sort;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        match Value::from_json(json) {
            Value::Map(map) => map,
            other => panic!("expected a map, got {other:?}"),
        }
    }

    fn fixture() -> Vec<(String, Document)> {
        vec![
            ("a".into(), doc(json!({"n": 1, "tags": ["x", "y"], "name": "alpha"}))),
            ("b".into(), doc(json!({"n": 2, "tags": ["y"], "name": "beta"}))),
            ("c".into(), doc(json!({"n": 3, "tags": [], "deep": {"k": "v"}}))),
            ("d".into(), doc(json!({"n": "3", "name": "delta"}))),
        ]
    }

    fn ids(rows: &[(String, Document)]) -> Vec<&str> {
        rows.iter().map(|(id, _)| id.as_str()).collect()
    }

    fn run_filter(filter: Filter) -> Vec<String> {
        let request = ScanRequest {
            filters: vec![filter],
            ..Default::default()
        };
        execute(fixture(), &request)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    #[test]
    fn comparison_operators_stay_within_type_class() {
        assert_eq!(run_filter(Filter::new("n", FilterOperator::Gt, 1)), ["b", "c"]);
        assert_eq!(run_filter(Filter::new("n", FilterOperator::Gte, 2)), ["b", "c"]);
        assert_eq!(run_filter(Filter::new("n", FilterOperator::Lt, 2)), ["a"]);
        assert_eq!(run_filter(Filter::new("n", FilterOperator::Lte, 2)), ["a", "b"]);
        assert_eq!(run_filter(Filter::new("n", FilterOperator::Eq, 3)), ["c"]);
        assert_eq!(run_filter(Filter::new("n", FilterOperator::Eq, "3")), ["d"]);
    }

    #[test]
    fn inequality_requires_field_presence() {
        assert_eq!(
            run_filter(Filter::new("name", FilterOperator::NotEq, "beta")),
            ["a", "d"]
        );
        assert_eq!(
            run_filter(Filter::new("name", FilterOperator::NotIn, vec!["alpha"])),
            ["b", "d"]
        );
    }

    #[test]
    fn membership_and_array_operators() {
        assert_eq!(
            run_filter(Filter::new("n", FilterOperator::In, vec![1, 3])),
            ["a", "c"]
        );
        assert_eq!(
            run_filter(Filter::new("tags", FilterOperator::ArrayContains, "y")),
            ["a", "b"]
        );
        assert_eq!(
            run_filter(Filter::new("tags", FilterOperator::ArrayContainsAny, vec!["x", "z"])),
            ["a"]
        );
    }

    #[test]
    fn nested_property_paths() {
        assert_eq!(run_filter(Filter::new("deep.k", FilterOperator::Eq, "v")), ["c"]);
    }

    #[test]
    fn ordered_scan_skips_missing_fields_and_breaks_ties_by_id() {
        let request = ScanRequest {
            order: Some(Sort::desc("name")),
            ..Default::default()
        };
        assert_eq!(ids(&execute(fixture(), &request)), ["d", "b", "a"]);

        let tied = vec![
            ("y".into(), doc(json!({"n": 1}))),
            ("x".into(), doc(json!({"n": 1}))),
        ];
        let asc = ScanRequest {
            order: Some(Sort::asc("n")),
            ..Default::default()
        };
        assert_eq!(ids(&execute(tied.clone(), &asc)), ["x", "y"]);
        let desc = ScanRequest {
            order: Some(Sort::desc("n")),
            ..Default::default()
        };
        assert_eq!(ids(&execute(tied, &desc)), ["y", "x"]);
    }

    #[test]
    fn bounds_are_strict_in_scan_direction() {
        let numeric = vec![Filter::new("n", FilterOperator::In, vec![1, 2, 3])];
        let request = ScanRequest {
            filters: numeric.clone(),
            order: Some(Sort::asc("n")),
            start_after: Some(Value::Integer(1)),
            ..Default::default()
        };
        assert_eq!(ids(&execute(fixture(), &request)), ["b", "c"]);

        let request = ScanRequest {
            filters: numeric.clone(),
            order: Some(Sort::desc("n")),
            start_after: Some(Value::Integer(3)),
            ..Default::default()
        };
        assert_eq!(ids(&execute(fixture(), &request)), ["b", "a"]);

        let request = ScanRequest {
            filters: numeric,
            order: Some(Sort::asc("n")),
            end_before: Some(Value::Integer(3)),
            ..Default::default()
        };
        assert_eq!(ids(&execute(fixture(), &request)), ["a", "b"]);
    }

    #[test]
    fn offset_then_limit() {
        let request = ScanRequest {
            offset: Some(1),
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(ids(&execute(fixture(), &request)), ["b", "c"]);
    }

    #[test]
    fn empty_result_is_fine() {
        let request = ScanRequest {
            filters: vec![Filter::new("n", FilterOperator::Gt, 100)],
            ..Default::default()
        };
        assert!(execute(fixture(), &request).is_empty());
    }
}
