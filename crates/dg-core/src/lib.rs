//! # dg-core — The "Grammar" of DIRGE
//!
//! Defines the vocabulary every other crate speaks: the [`EventRecord`]
//! atom, the four event partitions ([`EventKind`]), the well-known column
//! names, and the [`Cond`] predicate tree with its in-memory evaluator.
//!
//! Nothing in this crate does I/O. It is the shared language of the store,
//! the query engine, and the remote-caller surface.

pub mod cond;
pub mod event;

pub use cond::{Cond, CondValue, Op};
pub use event::{col, EventKind, EventRecord, ALL_KINDS};
