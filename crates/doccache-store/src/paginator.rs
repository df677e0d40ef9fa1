//! Cursor pagination planner.
//!
//! The document store can only bound an ordered scan from its start
//! ("start strictly after X") or its end ("end strictly before X"), and a
//! limit always keeps the *first* N rows of the scan. "The N rows right
//! before X" therefore cannot be expressed as a forward scan: the planner
//! flips the scan direction, turns the `before` cursor into a start bound,
//! and marks the plan as reversed so the rows are flipped back in memory.

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::query::{Filter, Query, Sort};
use crate::value::Value;

/// A concrete, store-executable scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    pub filters: Vec<Filter>,
    /// Physical scan order. `None` scans in document-id order.
    pub order: Option<Sort>,
    /// Exclusive lower bound in scan order.
    pub start_after: Option<Value>,
    /// Exclusive upper bound in scan order.
    pub end_before: Option<Value>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// A [`ScanRequest`] plus whether its rows come back in the opposite order
/// from the one the caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    pub request: ScanRequest,
    pub reversed: bool,
}

impl ScanPlan {
    /// Restore caller-facing order on the rows produced by this plan.
    pub fn finish<T>(&self, mut rows: Vec<T>) -> Vec<T> {
        if self.reversed {
            rows.reverse();
        }
        rows
    }
}

/// Stateless planner turning a [`Query`] into a [`ScanPlan`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorPaginator;

impl CursorPaginator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `query` and build the scan that answers it.
    pub fn plan(&self, query: &Query) -> StoreResult<ScanPlan> {
        validate(query)?;

        let reversed = query.before.is_some() && query.limit.is_some();

        let order = query.sort.as_ref().map(|sort| Sort {
            property: sort.property.clone(),
            direction: if reversed {
                sort.direction.reversed()
            } else {
                sort.direction
            },
        });

        let mut request = ScanRequest {
            filters: query.filters.clone(),
            order,
            start_after: None,
            end_before: None,
            offset: query.offset,
            limit: query.limit,
        };

        if let Some(before) = &query.before {
            if reversed {
                request.start_after = Some(before.clone());
            } else {
                request.end_before = Some(before.clone());
            }
        }

        if let Some(after) = &query.after {
            request.start_after = Some(after.clone());
        }

        debug!(
            reversed,
            order = ?request.order,
            offset = ?request.offset,
            limit = ?request.limit,
            "scan planned"
        );

        Ok(ScanPlan { request, reversed })
    }
}

fn validate(query: &Query) -> StoreResult<()> {
    if query.before.is_some() && query.after.is_some() {
        return Err(StoreError::InvalidQuery(
            "cannot provide both before and after for pagination".into(),
        ));
    }

    if (query.before.is_some() || query.after.is_some()) && query.sort.is_none() {
        return Err(StoreError::InvalidQuery(
            "if before or after is provided, must provide sort".into(),
        ));
    }

    if query.limit == Some(0) {
        return Err(StoreError::InvalidQuery("limit must be positive".into()));
    }

    for filter in &query.filters {
        if filter.operator.takes_array() && !matches!(filter.value, Value::Array(_)) {
            return Err(StoreError::InvalidQuery(format!(
                "operator `{}` on `{}` requires an array value",
                filter.operator, filter.property
            )));
        }
    }

    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterOperator, SortDirection};

    fn plan(query: Query) -> ScanPlan {
        CursorPaginator::new().plan(&query).unwrap()
    }

    #[test]
    fn before_with_limit_inverts_direction() {
        let plan = plan(Query::new().sort(Sort::asc("createdAt")).before(5).limit(1));
        assert!(plan.reversed);
        let order = plan.request.order.unwrap();
        assert_eq!(order.direction, SortDirection::Desc);
        assert_eq!(plan.request.start_after, Some(Value::Integer(5)));
        assert_eq!(plan.request.end_before, None);
        assert_eq!(plan.request.limit, Some(1));
    }

    #[test]
    fn before_without_limit_keeps_direction() {
        let plan = plan(Query::new().sort(Sort::desc("createdAt")).before(5));
        assert!(!plan.reversed);
        assert_eq!(plan.request.order.unwrap().direction, SortDirection::Desc);
        assert_eq!(plan.request.end_before, Some(Value::Integer(5)));
        assert_eq!(plan.request.start_after, None);
    }

    #[test]
    fn after_is_a_start_bound() {
        let plan = plan(Query::new().sort(Sort::asc("createdAt")).after(5).limit(3).offset(1));
        assert!(!plan.reversed);
        assert_eq!(plan.request.start_after, Some(Value::Integer(5)));
        assert_eq!(plan.request.offset, Some(1));
        assert_eq!(plan.request.limit, Some(3));
    }

    #[test]
    fn finish_reverses_only_reversed_plans() {
        let reversed = plan(Query::new().sort(Sort::asc("n")).before(9).limit(2));
        assert_eq!(reversed.finish(vec![3, 2]), vec![2, 3]);

        let forward = plan(Query::new().sort(Sort::asc("n")).after(1));
        assert_eq!(forward.finish(vec![2, 3]), vec![2, 3]);
    }

    #[test]
    fn rejects_both_cursors() {
        let err = CursorPaginator::new()
            .plan(&Query::new().sort(Sort::asc("n")).before(1).after(0))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn rejects_cursor_without_sort() {
        let err = CursorPaginator::new()
            .plan(&Query::new().after(0))
            .unwrap_err();
        assert!(err.to_string().contains("must provide sort"));
    }

    #[test]
    fn rejects_zero_limit_and_scalar_in_operand() {
        assert!(CursorPaginator::new().plan(&Query::new().limit(0)).is_err());
        assert!(
            CursorPaginator::new()
                .plan(&Query::new().filter("n", FilterOperator::In, 1))
                .is_err()
        );
        assert!(
            CursorPaginator::new()
                .plan(&Query::new().filter("n", FilterOperator::In, vec![1, 2]))
                .is_ok()
        );
    }

    #[test]
    fn unsorted_query_scans_in_id_order() {
        let plan = plan(Query::new().limit(4));
        assert!(!plan.reversed);
        assert!(plan.request.order.is_none());
    }
}
