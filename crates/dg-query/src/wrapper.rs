//! # QueryWrapper — One Partition's Query Plan
//!
//! A wrapper owns everything one partition needs for a paginated query:
//! the rule-derived predicate, the effective range bounds, the resume
//! cursor, and the transport buffer. The ordering variant is a closed
//! [`OrderMode`] enum chosen once at builder construction — time-ordered
//! wrappers page on `time_`, sequence-ordered wrappers on `seq_`.
//!
//! Pagination boundary rule: after every page the lower bound advances to
//! the last transported boundary value plus one, so the next page's
//! inclusive lower check cannot re-return the record sitting exactly on
//! the previous page's edge. When more than a page cap's worth of records
//! share one boundary value this skips the remainder, a known
//! approximation the cursor scheme accepts.

use std::mem;

use dg_core::{col, Cond, EventKind, EventRecord, Op};
use dg_store::{OrderBy, OrderCol, QuerySpec, StoreError, StoreExecutor};

use crate::executor::ResultSink;

/// The pagination ordering variant, fixed per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMode {
    /// Ascending `time_`; range is `time_ >= lower AND time_ < upper`.
    Time,
    /// Ascending `seq_`; range is `seq_ >= lower AND seq_ <= upper`.
    Seq,
}

impl OrderMode {
    #[inline]
    pub fn order_col(self) -> OrderCol {
        match self {
            OrderMode::Time => OrderCol::Time,
            OrderMode::Seq => OrderCol::Seq,
        }
    }

    /// The range predicate for the current page.
    fn range_cond(self, lower: i64, upper: i64) -> Cond {
        match self {
            OrderMode::Time => Cond::leaf(col::TIME, Op::Ge, lower)
                .and(Cond::leaf(col::TIME, Op::Lt, upper)),
            OrderMode::Seq => Cond::leaf(col::SEQ, Op::Ge, lower)
                .and(Cond::leaf(col::SEQ, Op::Le, upper)),
        }
    }

    /// The pagination boundary value of one row.
    #[inline]
    fn boundary(self, row: &EventRecord) -> i64 {
        match self {
            OrderMode::Time => row.happen_time,
            OrderMode::Seq => row.seq,
        }
    }
}

/// Counts from one executed page.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageStats {
    /// Rows accepted into the transport buffer.
    pub returned: usize,
    /// Rows dropped for exceeding the transport ceiling alone.
    pub dropped: usize,
}

/// Why a page could not run to completion.
#[derive(Debug)]
pub(crate) enum PageAbort {
    /// The result sink terminated mid-stream; abort without completion.
    SinkGone,
    Store(StoreError),
}

pub struct QueryWrapper {
    kind: EventKind,
    order: OrderMode,
    predicate: Option<Cond>,

    /// Effective range for the next page. `lower` is mutated by
    /// pagination; `upper` is fixed at construction.
    lower: i64,
    upper: i64,

    /// Row cap asked of the store on the most recent page.
    query_limit: usize,

    /// Highest sequence observed — the resume cursor.
    max_seq: i64,
    total_count: i64,
    transported: i64,
    ignored: i64,

    rows: Vec<String>,
    seqs: Vec<i64>,
    buffered_bytes: usize,

    is_first_page: bool,
    exhausted: bool,
}

impl QueryWrapper {
    pub(crate) fn new(kind: EventKind, order: OrderMode, lower: i64, upper: i64) -> Self {
        Self {
            kind,
            order,
            predicate: None,
            lower,
            upper,
            query_limit: 0,
            max_seq: 0,
            total_count: 0,
            transported: 0,
            ignored: 0,
            rows: Vec::new(),
            seqs: Vec::new(),
            buffered_bytes: 0,
            is_first_page: true,
            exhausted: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[inline]
    pub fn order(&self) -> OrderMode {
        self.order
    }

    pub fn transported(&self) -> i64 {
        self.transported
    }

    pub fn ignored(&self) -> i64 {
        self.ignored
    }

    pub fn total_count(&self) -> i64 {
        self.total_count
    }

    /// OR-fold one rule contribution into this wrapper's predicate.
    pub(crate) fn or_predicate(&mut self, contribution: Cond) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.or(contribution),
            None => contribution,
        });
    }

    /// Record a sequence position. The time-ordered variant only tracks it
    /// for completion reporting; the sequence-ordered variant additionally
    /// uses it to raise the effective lower bound on the next page.
    pub fn set_resume_cursor(&mut self, seq: i64) {
        if seq > self.max_seq {
            self.max_seq = seq;
        }
    }

    /// The highest sequence observed so far.
    pub fn resume_cursor(&self) -> i64 {
        self.max_seq
    }

    fn effective_lower(&self) -> i64 {
        match self.order {
            OrderMode::Time => self.lower,
            OrderMode::Seq if !self.is_first_page => self.lower.max(self.max_seq + 1),
            OrderMode::Seq => self.lower,
        }
    }

    /// Combine the range predicate with the rule-derived predicate and
    /// request ascending order on the pagination column.
    pub fn build_query(&self, limit: usize) -> QuerySpec {
        let range = self.order.range_cond(self.effective_lower(), self.upper);
        let predicate = match &self.predicate {
            Some(rules) => range.and(rules.clone()),
            None => range,
        };
        QuerySpec {
            predicate: Some(predicate),
            order: OrderBy::ascending(self.order.order_col()),
            limit,
        }
    }

    /// Run one page against the store and transport its rows.
    pub(crate) fn execute_page<S: StoreExecutor>(
        &mut self,
        store: &S,
        sink: &mut dyn ResultSink,
        ceiling: usize,
        ask_for: usize,
    ) -> Result<PageStats, PageAbort> {
        self.query_limit = ask_for;
        let spec = self.build_query(ask_for);
        let result = store
            .execute(self.kind, &spec)
            .map_err(PageAbort::Store)?;

        let mut stats = PageStats {
            returned: 0,
            dropped: 0,
        };
        for row in result {
            if self.transport(&row, sink, ceiling)? {
                stats.returned += 1;
            } else {
                stats.dropped += 1;
            }
        }
        tracing::debug!(
            kind = %self.kind,
            asked = ask_for,
            returned = stats.returned,
            dropped = stats.dropped,
            "query page executed"
        );
        Ok(stats)
    }

    /// Serialize and buffer one row, flushing first when it would push the
    /// buffer past the ceiling. Returns `false` when the row was dropped.
    fn transport(
        &mut self,
        row: &EventRecord,
        sink: &mut dyn ResultSink,
        ceiling: usize,
    ) -> Result<bool, PageAbort> {
        let json = match serde_json::to_string(row) {
            Ok(json) => json,
            Err(error) => {
                tracing::warn!(seq = row.seq, %error, "unserializable row dropped");
                self.ignored += 1;
                return Ok(false);
            }
        };
        if json.len() > ceiling {
            tracing::warn!(seq = row.seq, bytes = json.len(), "oversized row dropped");
            self.ignored += 1;
            return Ok(false);
        }
        if self.buffered_bytes + json.len() > ceiling {
            self.flush(sink)?;
        }

        self.buffered_bytes += json.len();
        self.rows.push(json);
        self.seqs.push(row.seq);
        self.total_count += 1;
        self.transported += 1;
        self.set_resume_cursor(row.seq);
        self.lower = self.order.boundary(row);
        Ok(true)
    }

    /// Advance past the last page's boundary record.
    pub(crate) fn advance_page(&mut self) {
        self.lower += 1;
        self.is_first_page = false;
    }

    /// A page that under-fills (accepted + dropped < asked) signals the
    /// partition has no further matching rows; an empty effective range
    /// does too.
    pub fn is_exhausted_for_this_page(
        &self,
        returned: usize,
        dropped: usize,
        asked_for: usize,
    ) -> bool {
        returned + dropped < asked_for || self.effective_lower() >= self.upper
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    /// True while this wrapper may still yield rows.
    pub fn needs_more(&self) -> bool {
        !self.exhausted && self.effective_lower() < self.upper
    }

    /// Send any buffered rows; called unconditionally when this wrapper's
    /// execution ends.
    pub(crate) fn flush_remaining(&mut self, sink: &mut dyn ResultSink) -> Result<(), PageAbort> {
        self.flush(sink)
    }

    fn flush(&mut self, sink: &mut dyn ResultSink) -> Result<(), PageAbort> {
        if self.rows.is_empty() {
            return Ok(());
        }
        if !sink.alive() {
            return Err(PageAbort::SinkGone);
        }
        let rows = mem::take(&mut self.rows);
        let seqs = mem::take(&mut self.seqs);
        self.buffered_bytes = 0;
        sink.on_batch(rows, seqs);
        Ok(())
    }
}
