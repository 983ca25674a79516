//! # Chain Executor — Driving a Request to Completion
//!
//! Walks the wrapper chain page by page under one event budget. Every
//! page asks the store for `min(remaining, page_cap)` rows; the budget
//! shrinks by the asked amount whether or not the partition filled the
//! page, so the loop terminates in at most
//! `chain_len * ceil(max_events / page_cap)` iterations. A partition that
//! keeps filling pages is kept; one that under-fills is exhausted and the
//! walk moves to the next wrapper with the range bounds reset (each
//! wrapper owns its own).
//!
//! Completion discipline: the sink receives `on_complete` exactly once
//! per request — success, store failure, or rule rejection alike. The
//! single exception is a sink that terminated mid-stream, detected before
//! every flush, which aborts the walk with no completion at all.

use dg_store::StoreExecutor;

use crate::builder::{QueryBuilder, QueryChain};
use crate::parser::ConditionParser;
use crate::rule::{QueryArgument, QueryLimits, QueryRule, ResolvedArgument};
use crate::status;
use crate::wrapper::PageAbort;

/// Receives query output: zero or more row batches, then one completion.
pub trait ResultSink {
    /// Liveness probe, checked before every flush. A sink that has gone
    /// away ends the request without a completion call.
    fn alive(&self) -> bool {
        true
    }

    fn on_batch(&mut self, rows: Vec<String>, seqs: Vec<i64>);

    fn on_complete(&mut self, status: i32, total_transported: i64);
}

/// An in-memory sink. The REST surface and most tests use it.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub batches: Vec<(Vec<String>, Vec<i64>)>,
    pub completions: Vec<(i32, i64)>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completion(&self) -> Option<(i32, i64)> {
        self.completions.last().copied()
    }

    /// Every transported sequence, in delivery order.
    pub fn all_seqs(&self) -> Vec<i64> {
        self.batches
            .iter()
            .flat_map(|(_, seqs)| seqs.iter().copied())
            .collect()
    }
}

impl ResultSink for CollectingSink {
    fn on_batch(&mut self, rows: Vec<String>, seqs: Vec<i64>) {
        self.batches.push((rows, seqs));
    }

    fn on_complete(&mut self, status: i32, total_transported: i64) {
        self.completions.push((status, total_transported));
    }
}

/// What one request did, from the engine's point of view.
///
/// `completed == false` only when the sink went away mid-stream; the
/// status field is meaningless in that case.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryReport {
    pub status: i32,
    pub transported: i64,
    pub ignored: i64,
    pub max_seq: i64,
    pub completed: bool,
}

/// The query engine: one shared parser, one set of limits, no per-request
/// state of its own. Safe to share across request threads.
#[derive(Default)]
pub struct QueryEngine {
    parser: ConditionParser,
    limits: QueryLimits,
}

impl QueryEngine {
    pub fn new(limits: QueryLimits) -> Self {
        Self {
            parser: ConditionParser::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    pub fn parser(&self) -> &ConditionParser {
        &self.parser
    }

    /// A builder over this engine's parser, for callers that want to
    /// assemble a chain rule by rule.
    pub fn builder(&self, argument: &QueryArgument) -> QueryBuilder<'_> {
        QueryBuilder::new(
            &self.parser,
            ResolvedArgument::resolve(argument),
            self.limits.default_kinds.clone(),
        )
    }

    /// Run one request end to end.
    pub fn run<S: StoreExecutor>(
        &self,
        store: &S,
        argument: &QueryArgument,
        rules: &[QueryRule],
        sink: &mut dyn ResultSink,
    ) -> QueryReport {
        if rules.len() > self.limits.max_rules {
            tracing::warn!(
                rules = rules.len(),
                max = self.limits.max_rules,
                "query rejected, too many rules"
            );
            return finish_empty(sink, status::TOO_MANY_RULES);
        }

        let resolved = ResolvedArgument::resolve(argument);
        let mut builder = QueryBuilder::new(
            &self.parser,
            resolved,
            self.limits.default_kinds.clone(),
        );
        for rule in rules {
            if let Err(error) = builder.append(rule) {
                tracing::warn!(domain = %rule.domain, %error, "query rule rejected");
                return finish_empty(sink, status::INVALID_RULE);
            }
        }

        self.run_prepared(store, argument, builder.build(), sink)
    }

    /// Execute a caller-assembled chain under `argument`'s budget.
    ///
    /// The lenient counterpart of [`QueryEngine::run`]: a chain built
    /// through [`QueryEngine::builder`] executes whatever predicates it
    /// kept, including rules that degraded to their domain/name match when
    /// their filter text failed to parse. An empty chain widens to the
    /// configured default partitions.
    pub fn run_prepared<S: StoreExecutor>(
        &self,
        store: &S,
        argument: &QueryArgument,
        mut chain: QueryChain,
        sink: &mut dyn ResultSink,
    ) -> QueryReport {
        let resolved = ResolvedArgument::resolve(argument);
        if chain.is_empty() {
            // A rule-less request covers the configured default partitions.
            chain = QueryChain::covering(&self.limits.default_kinds, &resolved);
        }
        self.run_chain(store, &resolved, &mut chain, sink)
    }

    fn run_chain<S: StoreExecutor>(
        &self,
        store: &S,
        resolved: &ResolvedArgument,
        chain: &mut QueryChain,
        sink: &mut dyn ResultSink,
    ) -> QueryReport {
        let page_cap = self.limits.page_cap.max(1) as i64;
        let ceiling = self.limits.transport_bytes;
        let mut remaining = resolved.max_events;
        let mut index = 0;
        let mut final_status = status::OK;

        while remaining > 0 && index < chain.wrappers.len() {
            let ask = remaining.min(page_cap) as usize;
            let stats = match chain.wrappers[index].execute_page(store, sink, ceiling, ask) {
                Ok(stats) => stats,
                Err(PageAbort::SinkGone) => return aborted(chain),
                Err(PageAbort::Store(error)) => {
                    tracing::warn!(%error, "store executor failed, finishing query early");
                    final_status = status::STORE_FAILURE;
                    break;
                }
            };
            chain.wrappers[index].advance_page();
            remaining -= ask as i64;

            if chain.wrappers[index].is_exhausted_for_this_page(
                stats.returned,
                stats.dropped,
                ask,
            ) {
                if chain.wrappers[index].flush_remaining(sink).is_err() {
                    return aborted(chain);
                }
                chain.wrappers[index].mark_exhausted();
                index += 1;
            }
        }

        // Budget exhaustion or store failure can leave the current
        // wrapper's buffer non-empty; the transported count must reflect
        // everything actually sent.
        if index < chain.wrappers.len()
            && chain.wrappers[index].flush_remaining(sink).is_err()
        {
            return aborted(chain);
        }

        let mut report = totals(chain, final_status);
        sink.on_complete(final_status, report.transported);
        report.completed = true;
        report
    }
}

fn finish_empty(sink: &mut dyn ResultSink, status: i32) -> QueryReport {
    sink.on_complete(status, 0);
    QueryReport {
        status,
        completed: true,
        ..QueryReport::default()
    }
}

fn aborted(chain: &QueryChain) -> QueryReport {
    tracing::warn!("result sink went away mid-stream, aborting without completion");
    totals(chain, status::OK)
}

fn totals(chain: &QueryChain, status: i32) -> QueryReport {
    let mut report = QueryReport {
        status,
        ..QueryReport::default()
    };
    for wrapper in chain.iter() {
        report.transported += wrapper.transported();
        report.ignored += wrapper.ignored();
        report.max_seq = report.max_seq.max(wrapper.resume_cursor());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_core::{EventKind, EventRecord};
    use dg_store::{EventStore, QuerySpec, ResultSet, StoreError};

    fn engine(limits: QueryLimits) -> QueryEngine {
        QueryEngine::new(limits)
    }

    fn seed(store: &EventStore, kind: EventKind, count: usize, time: impl Fn(usize) -> i64) {
        for i in 0..count {
            store
                .append(EventRecord::new("TESTDOMAIN", "EVENT", kind, time(i)))
                .unwrap();
        }
    }

    fn time_window(begin: i64, end: i64, max_events: i32) -> QueryArgument {
        QueryArgument {
            begin_time: begin,
            end_time: end,
            max_events,
            ..QueryArgument::default()
        }
    }

    #[test]
    fn test_empty_store_completes_with_zero() {
        let store = EventStore::new();
        let mut sink = CollectingSink::new();
        let report = engine(QueryLimits::default()).run(
            &store,
            &QueryArgument::default(),
            &[],
            &mut sink,
        );
        assert_eq!(sink.completions, vec![(status::OK, 0)]);
        assert!(report.completed);
        assert_eq!(report.transported, 0);
    }

    #[test]
    fn test_budget_is_satisfied_from_the_first_partition() {
        // 15 matching rows in partition A, 5 in partition B, budget 10:
        // exactly 10 rows, all from A.
        let store = EventStore::new();
        seed(&store, EventKind::Fault, 15, |i| i as i64);
        seed(&store, EventKind::Behavior, 5, |i| i as i64);

        let mut sink = CollectingSink::new();
        let report = engine(QueryLimits::default()).run(
            &store,
            &time_window(-1, -1, 10),
            &[],
            &mut sink,
        );

        assert_eq!(sink.completion(), Some((status::OK, 10)));
        assert_eq!(report.transported, 10);
        let seqs = sink.all_seqs();
        assert_eq!(seqs.len(), 10);
        // Fault rows were appended first and hold sequences 1..=15.
        assert!(seqs.iter().all(|&s| (1..=15).contains(&s)));
    }

    #[test]
    fn test_no_duplicates_across_pages_with_shared_timestamps() {
        let store = EventStore::new();
        // Pairs of rows share each timestamp; page cap 4 lands page
        // boundaries on shared values.
        seed(&store, EventKind::Fault, 10, |i| (i / 2) as i64 * 10);

        let limits = QueryLimits {
            page_cap: 4,
            ..QueryLimits::default()
        };
        let mut sink = CollectingSink::new();
        let report = engine(limits).run(&store, &time_window(-1, -1, -1), &[], &mut sink);

        let mut seqs = sink.all_seqs();
        assert_eq!(report.transported, 10);
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 10, "duplicate sequences across batches");
        assert_eq!(sink.completions.len(), 1);
    }

    #[test]
    fn test_full_pages_keep_the_partition_until_it_under_fills() {
        let store = EventStore::new();
        seed(&store, EventKind::Statistic, 9, |i| i as i64);
        let limits = QueryLimits {
            page_cap: 3,
            ..QueryLimits::default()
        };
        let mut sink = CollectingSink::new();
        let report = engine(limits).run(&store, &time_window(-1, -1, -1), &[], &mut sink);
        assert_eq!(report.transported, 9);
        assert_eq!(sink.completion(), Some((status::OK, 9)));
    }

    #[test]
    fn test_rules_route_to_their_partitions_only() {
        let store = EventStore::new();
        seed(&store, EventKind::Fault, 3, |i| i as i64);
        seed(&store, EventKind::Security, 2, |i| i as i64);

        let rules = vec![QueryRule::new("TESTDOMAIN", vec!["EVENT".into()], 3)];
        let mut sink = CollectingSink::new();
        let report = engine(QueryLimits::default()).run(
            &store,
            &time_window(-1, -1, -1),
            &rules,
            &mut sink,
        );
        assert_eq!(report.transported, 2);
        assert_eq!(sink.all_seqs(), vec![4, 5]);
    }

    #[test]
    fn test_rule_less_request_widens_to_configured_partitions() {
        let store = EventStore::new();
        seed(&store, EventKind::Fault, 2, |i| i as i64);
        seed(&store, EventKind::Behavior, 2, |i| i as i64);

        let limits = QueryLimits {
            default_kinds: vec![EventKind::Behavior],
            ..QueryLimits::default()
        };
        let mut sink = CollectingSink::new();
        let report = engine(limits).run(&store, &time_window(-1, -1, -1), &[], &mut sink);
        // Only the configured default partition is covered.
        assert_eq!(report.transported, 2);
        assert_eq!(sink.all_seqs(), vec![3, 4]);
    }

    #[test]
    fn test_sequence_ordered_pagination_resumes_by_cursor() {
        let store = EventStore::new();
        seed(&store, EventKind::Fault, 10, |_| 500);

        let argument = QueryArgument {
            from_seq: Some(3),
            to_seq: Some(8),
            ..QueryArgument::default()
        };
        let limits = QueryLimits {
            page_cap: 2,
            ..QueryLimits::default()
        };
        let mut sink = CollectingSink::new();
        let report = engine(limits).run(&store, &argument, &[], &mut sink);

        assert_eq!(sink.all_seqs(), vec![3, 4, 5, 6, 7, 8]);
        assert_eq!(report.max_seq, 8);
        assert_eq!(sink.completions.len(), 1);
    }

    #[test]
    fn test_invalid_filter_text_fails_the_request() {
        let store = EventStore::new();
        seed(&store, EventKind::Fault, 2, |i| i as i64);
        let rules =
            vec![QueryRule::new("TESTDOMAIN", vec![], 1).with_filter("{malformed")];
        let mut sink = CollectingSink::new();
        let report = engine(QueryLimits::default()).run(
            &store,
            &time_window(-1, -1, -1),
            &rules,
            &mut sink,
        );
        assert_eq!(report.status, status::INVALID_RULE);
        assert_eq!(sink.completions, vec![(status::INVALID_RULE, 0)]);
        assert!(sink.batches.is_empty());
    }

    #[test]
    fn test_prepared_chain_executes_a_degraded_rule() {
        // The lenient path: append surfaces the parse error, but the
        // chain it leaves behind still runs on its domain/name match.
        let store = EventStore::new();
        seed(&store, EventKind::Fault, 3, |i| i as i64);

        let engine = engine(QueryLimits::default());
        let argument = time_window(-1, -1, -1);
        let mut builder = engine.builder(&argument);
        let rule = QueryRule::new("TESTDOMAIN", vec![], 1).with_filter("{broken");
        assert!(builder.append(&rule).is_err());

        let chain = builder.build();
        assert_eq!(chain.len(), 1);
        let mut sink = CollectingSink::new();
        let report = engine.run_prepared(&store, &argument, chain, &mut sink);
        assert_eq!(report.status, status::OK);
        assert_eq!(report.transported, 3);
        assert_eq!(sink.completions, vec![(status::OK, 3)]);
    }

    #[test]
    fn test_prepared_empty_chain_widens_to_default_partitions() {
        let store = EventStore::new();
        seed(&store, EventKind::Behavior, 2, |i| i as i64);

        let engine = engine(QueryLimits::default());
        let argument = QueryArgument::default();
        let chain = engine.builder(&argument).build();
        assert!(chain.is_empty());

        let mut sink = CollectingSink::new();
        let report = engine.run_prepared(&store, &argument, chain, &mut sink);
        assert_eq!(report.transported, 2);
    }

    #[test]
    fn test_too_many_rules_short_circuits() {
        let store = EventStore::new();
        let limits = QueryLimits {
            max_rules: 1,
            ..QueryLimits::default()
        };
        let rules = vec![
            QueryRule::new("D1", vec![], 1),
            QueryRule::new("D2", vec![], 2),
        ];
        let mut sink = CollectingSink::new();
        let report = engine(limits).run(&store, &time_window(-1, -1, -1), &rules, &mut sink);
        assert_eq!(report.status, status::TOO_MANY_RULES);
        assert_eq!(sink.completions, vec![(status::TOO_MANY_RULES, 0)]);
    }

    struct FailingStore;

    impl dg_store::StoreExecutor for FailingStore {
        fn execute(&self, _: EventKind, _: &QuerySpec) -> Result<ResultSet, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
    }

    #[test]
    fn test_store_failure_still_completes_exactly_once() {
        let mut sink = CollectingSink::new();
        let report = engine(QueryLimits::default()).run(
            &FailingStore,
            &time_window(-1, -1, -1),
            &[],
            &mut sink,
        );
        assert_eq!(report.status, status::STORE_FAILURE);
        assert!(report.completed);
        assert_eq!(sink.completions, vec![(status::STORE_FAILURE, 0)]);
    }

    /// A sink whose caller has terminated; flushes must never reach it.
    struct DeadSink {
        completions: usize,
    }

    impl ResultSink for DeadSink {
        fn alive(&self) -> bool {
            false
        }

        fn on_batch(&mut self, _: Vec<String>, _: Vec<i64>) {
            panic!("batch delivered to a dead sink");
        }

        fn on_complete(&mut self, _: i32, _: i64) {
            self.completions += 1;
        }
    }

    #[test]
    fn test_dead_sink_aborts_without_completion() {
        let store = EventStore::new();
        seed(&store, EventKind::Fault, 5, |i| i as i64);
        let mut sink = DeadSink { completions: 0 };
        let report = engine(QueryLimits::default()).run(
            &store,
            &time_window(-1, -1, -1),
            &[],
            &mut sink,
        );
        assert!(!report.completed);
        assert_eq!(sink.completions, 0);
    }

    #[test]
    fn test_unbounded_request_terminates() {
        let store = EventStore::new();
        for kind in dg_core::ALL_KINDS {
            seed(&store, kind, 7, |i| i as i64);
        }
        let limits = QueryLimits {
            page_cap: 2,
            ..QueryLimits::default()
        };
        let mut sink = CollectingSink::new();
        let report = engine(limits).run(&store, &QueryArgument::default(), &[], &mut sink);
        assert_eq!(report.transported, 28);
        assert_eq!(sink.completion(), Some((status::OK, 28)));
    }
}

// Model-checking harnesses for the executor's progress and admission
// invariants. These are proofs, not tests: Kani explores every input the
// assumptions admit.
#[cfg(kani)]
mod proofs {
    /// The budget strictly decreases every iteration while positive, so
    /// the chain walk cannot loop forever.
    #[kani::proof]
    fn verify_budget_strictly_decreases() {
        let remaining: i64 = kani::any();
        let page_cap: i64 = kani::any();
        kani::assume(remaining > 0);
        kani::assume(page_cap >= 1 && page_cap <= 1000);

        let ask = remaining.min(page_cap);
        assert!(ask >= 1);
        assert!(remaining - ask >= 0);
        assert!(remaining - ask < remaining);
    }

    /// The transport admission rule keeps every batch at or under the
    /// ceiling: an oversized row is dropped outright, and a row that
    /// would overflow the buffer forces a flush first.
    #[kani::proof]
    fn verify_buffer_never_exceeds_ceiling() {
        let ceiling: usize = kani::any();
        let buffered: usize = kani::any();
        let row: usize = kani::any();
        kani::assume(ceiling > 0 && ceiling <= 1 << 20);
        kani::assume(buffered <= ceiling);
        kani::assume(row <= 1 << 20);

        if row > ceiling {
            // Dropped; the buffer is untouched.
            assert!(buffered <= ceiling);
        } else {
            let after_flush = if buffered + row > ceiling { 0 } else { buffered };
            assert!(after_flush + row <= ceiling);
        }
    }
}
