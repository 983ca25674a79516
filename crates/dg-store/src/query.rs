//! # Store Query Contract
//!
//! The surface the query engine consumes: a [`QuerySpec`] describing
//! predicate, order and limit, executed per partition through the
//! [`StoreExecutor`] trait, yielding an exactly-sized [`ResultSet`].
//!
//! The engine always asks for ascending order on the time or sequence
//! column; implementations must honor `limit` exactly — never more rows.

use dg_core::{Cond, EventKind, EventRecord};

use crate::StoreError;

/// The column a query is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCol {
    Time,
    Seq,
}

/// Requested result order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub col: OrderCol,
    pub ascending: bool,
}

impl OrderBy {
    pub fn ascending(col: OrderCol) -> Self {
        Self {
            col,
            ascending: true,
        }
    }
}

/// One partition-level query: optional predicate, order, row cap.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub predicate: Option<Cond>,
    pub order: OrderBy,
    pub limit: usize,
}

/// An owning iterator over query results with an exact remaining count.
pub struct ResultSet {
    rows: std::vec::IntoIter<EventRecord>,
}

impl ResultSet {
    pub fn new(rows: Vec<EventRecord>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl Iterator for ResultSet {
    type Item = EventRecord;

    fn next(&mut self) -> Option<EventRecord> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for ResultSet {}

/// The external-store contract the query engine runs against.
///
/// Rows must come back in the requested order, at most `limit` of them.
/// Ties on the time column are broken by sequence so pagination sees a
/// total order.
pub trait StoreExecutor {
    fn execute(&self, kind: EventKind, spec: &QuerySpec) -> Result<ResultSet, StoreError>;
}
