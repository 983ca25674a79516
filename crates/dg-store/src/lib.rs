//! # dg-store — The "Ledger" of DIRGE
//!
//! A type-partitioned, append-only event store. Four partitions (one per
//! [`EventKind`](dg_core::EventKind)) share a single process-wide sequence
//! counter, so sequence numbers are globally unique and monotonic across
//! the whole store.
//!
//! The query engine consumes this crate only through the [`StoreExecutor`]
//! trait — a `(predicate, order, limit)` contract. [`EventStore`] is the
//! in-process implementation; [`Journal`] gives it crash-tolerant
//! durability with crc-framed JSON lines.

pub mod journal;
pub mod query;
pub mod store;

pub use journal::Journal;
pub use query::{OrderBy, OrderCol, QuerySpec, ResultSet, StoreExecutor};
pub use store::EventStore;

use thiserror::Error;

/// Errors surfaced by the store and its journal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt journal line {line} in {file}")]
    CorruptLine { file: String, line: usize },

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}
