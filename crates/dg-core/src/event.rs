//! # Event Atom — Records and Partitions
//!
//! An [`EventRecord`] is one structured diagnostics event: a domain, a name,
//! a partition kind, a millisecond timestamp, a store-assigned sequence
//! number, and an open set of caller parameters.
//!
//! The wire form is flat JSON. The five built-in fields carry trailing
//! underscores (`domain_`, `name_`, `type_`, `time_`, `seq_`) so they can
//! never collide with caller parameter keys; parameters are flattened
//! alongside them.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The four event partitions of the diagnostics store.
///
/// Wire values are `1..=4` and are stable — they appear in stored rows,
/// query rules, and the `type_` column of the condition grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Fault,
    Statistic,
    Security,
    Behavior,
}

/// All partitions, in wire-value order.
pub const ALL_KINDS: [EventKind; 4] = [
    EventKind::Fault,
    EventKind::Statistic,
    EventKind::Security,
    EventKind::Behavior,
];

impl EventKind {
    /// The stable wire value (`1..=4`).
    #[inline]
    pub fn as_u32(self) -> u32 {
        match self {
            EventKind::Fault => 1,
            EventKind::Statistic => 2,
            EventKind::Security => 3,
            EventKind::Behavior => 4,
        }
    }

    /// Decode a wire value. Returns `None` for anything outside `1..=4`.
    #[inline]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(EventKind::Fault),
            2 => Some(EventKind::Statistic),
            3 => Some(EventKind::Security),
            4 => Some(EventKind::Behavior),
            _ => None,
        }
    }

    /// Lower-case partition name, used in file names and status output.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Fault => "fault",
            EventKind::Statistic => "statistic",
            EventKind::Security => "security",
            EventKind::Behavior => "behavior",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Events serialize the kind as its numeric wire value, matching the
// `type_` column the condition grammar compares against.
impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.as_u32())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u32::deserialize(deserializer)?;
        EventKind::from_u32(raw)
            .ok_or_else(|| de::Error::custom(format!("unknown event kind {raw}")))
    }
}

/// Well-known column names shared between stored rows and the condition
/// grammar. Any other column name resolves through the event's parameters.
pub mod col {
    pub const DOMAIN: &str = "domain_";
    pub const NAME: &str = "name_";
    pub const TYPE: &str = "type_";
    pub const TIME: &str = "time_";
    pub const SEQ: &str = "seq_";
}

/// One structured diagnostics event.
///
/// `seq` is assigned by the store at append time; a freshly constructed
/// record carries `0` until then. `happen_time` is wall-clock milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "domain_")]
    pub domain: String,

    #[serde(rename = "name_")]
    pub name: String,

    #[serde(rename = "type_")]
    pub kind: EventKind,

    #[serde(rename = "time_")]
    pub happen_time: i64,

    #[serde(rename = "seq_", default)]
    pub seq: i64,

    /// Caller-supplied parameters, flattened into the wire form.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl EventRecord {
    pub fn new(
        domain: impl Into<String>,
        name: impl Into<String>,
        kind: EventKind,
        happen_time: i64,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            kind,
            happen_time,
            seq: 0,
            params: Map::new(),
        }
    }

    /// Attach one parameter, builder-style.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Resolve a column name against this record.
    ///
    /// The five built-in columns map to native fields; anything else is
    /// looked up in `params`. Returns `None` when the column is absent or
    /// holds a non-scalar value (an absent column matches no predicate).
    pub fn column(&self, name: &str) -> Option<crate::cond::CondValue> {
        use crate::cond::CondValue;
        match name {
            col::DOMAIN => Some(CondValue::Str(self.domain.clone())),
            col::NAME => Some(CondValue::Str(self.name.clone())),
            col::TYPE => Some(CondValue::Int(i64::from(self.kind.as_u32()))),
            col::TIME => Some(CondValue::Int(self.happen_time)),
            col::SEQ => Some(CondValue::Int(self.seq)),
            other => self.params.get(other).and_then(CondValue::from_json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cond::CondValue;

    #[test]
    fn test_kind_wire_values_round_trip() {
        for kind in ALL_KINDS {
            assert_eq!(EventKind::from_u32(kind.as_u32()), Some(kind));
        }
        assert_eq!(EventKind::from_u32(0), None);
        assert_eq!(EventKind::from_u32(5), None);
    }

    #[test]
    fn test_record_serializes_to_flat_wire_form() {
        let record = EventRecord::new("RELIABILITY", "APP_FREEZE", EventKind::Fault, 1000)
            .with_param("PID", 42)
            .with_param("PACKAGE", "com.example.app");
        let wire = serde_json::to_value(&record).unwrap();

        assert_eq!(wire["domain_"], "RELIABILITY");
        assert_eq!(wire["name_"], "APP_FREEZE");
        assert_eq!(wire["type_"], 1);
        assert_eq!(wire["time_"], 1000);
        assert_eq!(wire["seq_"], 0);
        assert_eq!(wire["PID"], 42);
        assert_eq!(wire["PACKAGE"], "com.example.app");
    }

    #[test]
    fn test_record_round_trips_through_wire_form() {
        let record = EventRecord::new("SECURITY", "PERM_DENIED", EventKind::Security, 77)
            .with_param("UID", 1201);
        let json = serde_json::to_string(&record).unwrap();
        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_column_resolves_builtins_and_params() {
        let mut record = EventRecord::new("POWER", "BATTERY", EventKind::Statistic, 500)
            .with_param("LEVEL", 88);
        record.seq = 9;

        assert_eq!(
            record.column(col::DOMAIN),
            Some(CondValue::Str("POWER".into()))
        );
        assert_eq!(record.column(col::TYPE), Some(CondValue::Int(2)));
        assert_eq!(record.column(col::SEQ), Some(CondValue::Int(9)));
        assert_eq!(record.column("LEVEL"), Some(CondValue::Int(88)));
        assert_eq!(record.column("MISSING"), None);
    }
}
