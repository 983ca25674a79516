//! # Request Shapes — Arguments, Rules, Limits
//!
//! The caller-supplied half of a query: the time/sequence window and event
//! budget ([`QueryArgument`]), the per-domain filter units ([`QueryRule`]),
//! and the engine's configured ceilings ([`QueryLimits`]).

use dg_core::{EventKind, ALL_KINDS};
use serde::{Deserialize, Serialize};

use crate::wrapper::OrderMode;

/// The window and budget of one query request.
///
/// Negative `begin_time`/`end_time`/`max_events` mean "unbounded".
/// Presence of both `from_seq` and `to_seq` (each ≥ 0) switches the
/// request to sequence-ordered pagination — a one-time decision, immutable
/// for the life of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryArgument {
    #[serde(default = "unbounded")]
    pub begin_time: i64,

    #[serde(default = "unbounded")]
    pub end_time: i64,

    #[serde(default = "unbounded_count")]
    pub max_events: i32,

    #[serde(default)]
    pub from_seq: Option<i64>,

    #[serde(default)]
    pub to_seq: Option<i64>,
}

fn unbounded() -> i64 {
    -1
}

fn unbounded_count() -> i32 {
    -1
}

impl Default for QueryArgument {
    fn default() -> Self {
        Self {
            begin_time: -1,
            end_time: -1,
            max_events: -1,
            from_seq: None,
            to_seq: None,
        }
    }
}

/// One filter unit: a domain, its event names, the partition it targets,
/// and optional raw condition text.
///
/// An empty `event_names` list means "all events of this domain".
/// `event_type` `1..=4` targets one partition; `0` leaves the partition
/// unspecified and folds the rule into every default partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRule {
    #[serde(default)]
    pub domain: String,

    #[serde(default)]
    pub event_names: Vec<String>,

    #[serde(default)]
    pub event_type: u32,

    #[serde(default)]
    pub filter_text: String,
}

impl QueryRule {
    pub fn new(domain: impl Into<String>, event_names: Vec<String>, event_type: u32) -> Self {
        Self {
            domain: domain.into(),
            event_names,
            event_type,
            filter_text: String::new(),
        }
    }

    pub fn with_filter(mut self, filter_text: impl Into<String>) -> Self {
        self.filter_text = filter_text.into();
        self
    }
}

/// Engine ceilings, overridable from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryLimits {
    /// Byte ceiling of one batch flushed to the result sink.
    #[serde(default = "default_transport_bytes")]
    pub transport_bytes: usize,

    /// Row cap of one store query (one page).
    #[serde(default = "default_page_cap")]
    pub page_cap: usize,

    /// Most rules accepted in one request.
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,

    /// Partitions covered when a request names none.
    #[serde(default = "default_kinds")]
    pub default_kinds: Vec<EventKind>,
}

fn default_transport_bytes() -> usize {
    768 * 1024
}

fn default_page_cap() -> usize {
    1000
}

fn default_max_rules() -> usize {
    100
}

fn default_kinds() -> Vec<EventKind> {
    ALL_KINDS.to_vec()
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            transport_bytes: default_transport_bytes(),
            page_cap: default_page_cap(),
            max_rules: default_max_rules(),
            default_kinds: default_kinds(),
        }
    }
}

/// A [`QueryArgument`] with defaults applied and the ordering variant
/// chosen. Built once per request; `lower <= upper` may still be false
/// for a caller-supplied empty window, which simply yields no rows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedArgument {
    pub order: OrderMode,
    pub lower: i64,
    pub upper: i64,
    pub max_events: i64,
}

impl ResolvedArgument {
    pub fn resolve(argument: &QueryArgument) -> Self {
        let max_events = if argument.max_events < 0 {
            i64::MAX
        } else {
            i64::from(argument.max_events)
        };
        match (argument.from_seq, argument.to_seq) {
            (Some(from), Some(to)) if from >= 0 && to >= 0 => Self {
                order: OrderMode::Seq,
                lower: from,
                upper: to,
                max_events,
            },
            _ => Self {
                order: OrderMode::Time,
                lower: argument.begin_time.max(0),
                upper: if argument.end_time < 0 {
                    i64::MAX
                } else {
                    argument.end_time
                },
                max_events,
            },
        }
    }
}
