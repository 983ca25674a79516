//! # dg-query — The "Engine" of DIRGE
//!
//! Answers bounded, resumable queries against the type-partitioned event
//! store, for remote callers over a size-limited transport.
//!
//! Three pieces, leaves first:
//!
//! - [`ConditionParser`] turns caller-supplied filter text into a
//!   [`Cond`](dg_core::Cond) predicate tree, memoizing parses.
//! - [`QueryBuilder`] folds [`QueryRule`]s into a chain of per-partition
//!   [`QueryWrapper`]s, picking the time- or sequence-ordered variant once
//!   from the shape of the [`QueryArgument`].
//! - [`QueryEngine`] walks the chain page by page, buffering serialized
//!   rows under the transport byte ceiling, flushing batches to a
//!   [`ResultSink`], and always ending with exactly one completion signal.
//!
//! Everything here is synchronous; one request runs on one thread from
//! start to finish. The only state shared between concurrent requests is
//! the parser's memoization cache.

pub mod builder;
pub mod executor;
pub mod parser;
pub mod rule;
pub mod wrapper;

pub use builder::{QueryBuilder, QueryChain};
pub use executor::{CollectingSink, QueryEngine, QueryReport, ResultSink};
pub use parser::{ConditionParser, ParseError};
pub use rule::{QueryArgument, QueryLimits, QueryRule};
pub use wrapper::{OrderMode, QueryWrapper};

use thiserror::Error;

/// Wire-level completion status codes. The completion status is a plain
/// `i32` in the caller's protocol; `0` is success, negatives are terminal
/// failures.
pub mod status {
    pub const OK: i32 = 0;
    pub const INVALID_RULE: i32 = -1;
    pub const STORE_FAILURE: i32 = -2;
    pub const TOO_MANY_RULES: i32 = -3;
}

/// Errors raised while assembling a query from caller-supplied rules.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown event type {0}")]
    UnknownEventType(u32),

    #[error("invalid filter text: {0}")]
    InvalidFilter(#[from] ParseError),
}
