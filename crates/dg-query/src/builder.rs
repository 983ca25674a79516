//! # QueryBuilder — Rules Into a Wrapper Chain
//!
//! Folds caller rules into per-partition [`QueryWrapper`]s. The chain is
//! an arena walked by index, not linked nodes; wrappers appear in
//! first-seen rule order. The ordering variant is selected once, eagerly,
//! from the argument's shape, before any rule is appended.
//!
//! Rule folding: each rule contributes
//! `(domain == d) AND (name == n1 OR name == n2 OR ...)`, AND-ed with its
//! parsed filter text when present; contributions targeting the same
//! wrapper fold with OR. An unparseable filter degrades the rule to its
//! domain/name contribution — the wrapper still exists — and surfaces the
//! parse error so the boundary that issued the text can reject the
//! request.

use dg_core::{col, Cond, EventKind, Op};

use crate::parser::ConditionParser;
use crate::rule::{QueryRule, ResolvedArgument};
use crate::wrapper::{OrderMode, QueryWrapper};
use crate::QueryError;

/// The ordered sequence of per-partition wrappers one request walks.
pub struct QueryChain {
    pub(crate) wrappers: Vec<QueryWrapper>,
}

impl QueryChain {
    /// A chain covering `kinds` with no rule predicate — the widening
    /// applied when a request names no rules at all.
    pub(crate) fn covering(kinds: &[EventKind], resolved: &ResolvedArgument) -> Self {
        Self {
            wrappers: kinds
                .iter()
                .map(|&kind| {
                    QueryWrapper::new(kind, resolved.order, resolved.lower, resolved.upper)
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryWrapper> {
        self.wrappers.iter()
    }
}

pub struct QueryBuilder<'p> {
    parser: &'p ConditionParser,
    resolved: ResolvedArgument,
    default_kinds: Vec<EventKind>,
    wrappers: Vec<QueryWrapper>,
    has_valid_rule: bool,
}

impl<'p> QueryBuilder<'p> {
    pub(crate) fn new(
        parser: &'p ConditionParser,
        resolved: ResolvedArgument,
        default_kinds: Vec<EventKind>,
    ) -> Self {
        Self {
            parser,
            resolved,
            default_kinds,
            wrappers: Vec::new(),
            has_valid_rule: false,
        }
    }

    /// The ordering variant chosen at construction.
    pub fn order(&self) -> OrderMode {
        self.resolved.order
    }

    /// Fold one rule into the chain.
    ///
    /// Event type `1..=4` targets one partition, `0` folds the rule into
    /// every default partition, anything else is rejected. A filter text
    /// that fails to parse still leaves the domain/name contribution in
    /// place but returns the error.
    pub fn append(&mut self, rule: &QueryRule) -> Result<(), QueryError> {
        let kinds: Vec<EventKind> = match rule.event_type {
            0 => self.default_kinds.clone(),
            other => vec![EventKind::from_u32(other)
                .ok_or(QueryError::UnknownEventType(other))?],
        };

        // Parse first so a bad filter still folds domain/name below.
        let filter = if rule.filter_text.trim().is_empty() {
            Ok(None)
        } else {
            self.parser.parse(&rule.filter_text).map(Some)
        };
        let (extra, filter_error) = match filter {
            Ok(extra) => (extra, None),
            Err(error) => {
                tracing::warn!(
                    domain = %rule.domain,
                    %error,
                    "filter text rejected, rule degrades to domain/name match"
                );
                (None, Some(error))
            }
        };

        for kind in kinds {
            let mut contribution = Cond::leaf(col::DOMAIN, Op::Eq, rule.domain.clone());
            if let Some(names) = name_cond(&rule.event_names) {
                contribution = contribution.and(names);
            }
            if let Some(extra) = &extra {
                contribution = contribution.and(extra.clone());
            }
            self.wrapper_mut(kind).or_predicate(contribution);
        }
        if !rule.domain.is_empty() {
            self.has_valid_rule = true;
        }

        match filter_error {
            Some(error) => Err(QueryError::InvalidFilter(error)),
            None => Ok(()),
        }
    }

    /// Find the wrapper for `kind`, creating and linking it as the new
    /// chain tail on first sight.
    fn wrapper_mut(&mut self, kind: EventKind) -> &mut QueryWrapper {
        if let Some(index) = self.wrappers.iter().position(|w| w.kind() == kind) {
            return &mut self.wrappers[index];
        }
        self.wrappers.push(QueryWrapper::new(
            kind,
            self.resolved.order,
            self.resolved.lower,
            self.resolved.upper,
        ));
        self.wrappers.last_mut().expect("just pushed")
    }

    /// True only if at least one rule with a non-empty domain was appended.
    pub fn is_valid(&self) -> bool {
        self.has_valid_rule
    }

    /// The assembled chain; empty when no rules were appended. Widening an
    /// empty chain to the default partitions is the executor's decision,
    /// not the builder's.
    pub fn build(self) -> QueryChain {
        QueryChain {
            wrappers: self.wrappers,
        }
    }
}

/// `name == n1 OR name == n2 OR ...`, or `None` when the rule covers all
/// events of its domain.
fn name_cond(names: &[String]) -> Option<Cond> {
    let mut iter = names.iter();
    let first = iter.next()?;
    let mut cond = Cond::leaf(col::NAME, Op::Eq, first.clone());
    for name in iter {
        cond = cond.or(Cond::leaf(col::NAME, Op::Eq, name.clone()));
    }
    Some(cond)
}
