//! # Cond — The Predicate Tree
//!
//! An immutable boolean expression over column/operator/value leaves,
//! combined with AND/OR. Built once (by the condition parser or the query
//! builder), owned by a single query wrapper, never mutated afterwards.
//!
//! The [`Cond::matches`] evaluator exists for the in-process store; a
//! different store executor is free to compile the same tree into whatever
//! plan it likes.

use std::cmp::Ordering;

use serde_json::Value;

use crate::event::EventRecord;

/// Comparison operators allowed in a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    /// Apply this operator to an already-computed ordering.
    #[inline]
    fn holds(self, ord: Ordering) -> bool {
        match self {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
        }
    }
}

/// A scalar comparison value. Arrays and objects are rejected upstream by
/// the condition parser; booleans and nulls are likewise not scalars here.
#[derive(Debug, Clone, PartialEq)]
pub enum CondValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl CondValue {
    /// Lift a JSON value into a scalar, or `None` if it is not one.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(CondValue::Str(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(CondValue::Int(i))
                } else {
                    n.as_f64().map(CondValue::Float)
                }
            }
            _ => None,
        }
    }

    /// Compare two scalars of possibly different types.
    ///
    /// Int/Int compares exactly; any Int/Float mix compares as f64;
    /// Str/Str compares lexicographically. A string against a number is a
    /// type mismatch and yields `None` — no operator holds, `Ne` included.
    fn ordering(&self, other: &CondValue) -> Option<Ordering> {
        match (self, other) {
            (CondValue::Int(a), CondValue::Int(b)) => Some(a.cmp(b)),
            (CondValue::Str(a), CondValue::Str(b)) => Some(a.cmp(b)),
            (CondValue::Int(a), CondValue::Float(b)) => (*a as f64).partial_cmp(b),
            (CondValue::Float(a), CondValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (CondValue::Float(a), CondValue::Float(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<&str> for CondValue {
    fn from(s: &str) -> Self {
        CondValue::Str(s.to_string())
    }
}

impl From<String> for CondValue {
    fn from(s: String) -> Self {
        CondValue::Str(s)
    }
}

impl From<i64> for CondValue {
    fn from(i: i64) -> Self {
        CondValue::Int(i)
    }
}

impl From<f64> for CondValue {
    fn from(f: f64) -> Self {
        CondValue::Float(f)
    }
}

/// The predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Leaf {
        col: String,
        op: Op,
        value: CondValue,
    },
    And(Vec<Cond>),
    Or(Vec<Cond>),
}

impl Cond {
    pub fn leaf(col: impl Into<String>, op: Op, value: impl Into<CondValue>) -> Self {
        Cond::Leaf {
            col: col.into(),
            op,
            value: value.into(),
        }
    }

    /// `self AND other`.
    ///
    /// Flattens into an existing `And` node so that left-to-right folds
    /// produce one wide node instead of one nesting level per clause.
    pub fn and(self, other: Cond) -> Cond {
        match self {
            Cond::And(mut children) => {
                children.push(other);
                Cond::And(children)
            }
            first => Cond::And(vec![first, other]),
        }
    }

    /// `self OR other`. Flattens like [`Cond::and`].
    pub fn or(self, other: Cond) -> Cond {
        match self {
            Cond::Or(mut children) => {
                children.push(other);
                Cond::Or(children)
            }
            first => Cond::Or(vec![first, other]),
        }
    }

    /// Evaluate this predicate against one record.
    ///
    /// A leaf over a missing column, or over a column whose stored type
    /// mismatches the condition value, matches nothing for every operator.
    pub fn matches(&self, record: &EventRecord) -> bool {
        match self {
            Cond::Leaf { col, op, value } => match record.column(col) {
                Some(field) => field.ordering(value).is_some_and(|ord| op.holds(ord)),
                None => false,
            },
            Cond::And(children) => children.iter().all(|c| c.matches(record)),
            Cond::Or(children) => children.iter().any(|c| c.matches(record)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn record() -> EventRecord {
        EventRecord::new("RELIABILITY", "APP_FREEZE", EventKind::Fault, 1000)
            .with_param("PID", 42)
            .with_param("RATIO", 0.5)
            .with_param("PACKAGE", "com.example.app")
    }

    #[test]
    fn test_and_flattens_left_fold() {
        let cond = Cond::leaf("a", Op::Eq, 1i64)
            .and(Cond::leaf("b", Op::Eq, 2i64))
            .and(Cond::leaf("c", Op::Eq, 3i64));
        match cond {
            Cond::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_or_flattens_left_fold() {
        let cond = Cond::leaf("a", Op::Eq, 1i64)
            .or(Cond::leaf("b", Op::Eq, 2i64))
            .or(Cond::leaf("c", Op::Eq, 3i64));
        match cond {
            Cond::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn test_leaf_matches_builtin_and_param_columns() {
        let r = record();
        assert!(Cond::leaf("domain_", Op::Eq, "RELIABILITY").matches(&r));
        assert!(Cond::leaf("type_", Op::Eq, 1i64).matches(&r));
        assert!(Cond::leaf("PID", Op::Gt, 40i64).matches(&r));
        assert!(!Cond::leaf("PID", Op::Gt, 42i64).matches(&r));
    }

    #[test]
    fn test_int_and_float_mix_compares_numerically() {
        let r = record();
        assert!(Cond::leaf("PID", Op::Lt, 42.5).matches(&r));
        assert!(Cond::leaf("RATIO", Op::Ge, 0i64).matches(&r));
    }

    #[test]
    fn test_type_mismatch_matches_nothing_even_for_ne() {
        let r = record();
        let mismatched = Cond::leaf("PACKAGE", Op::Ne, 7i64);
        assert!(!mismatched.matches(&r));
    }

    #[test]
    fn test_missing_column_matches_nothing() {
        let r = record();
        assert!(!Cond::leaf("NOPE", Op::Ne, 0i64).matches(&r));
        assert!(!Cond::leaf("NOPE", Op::Eq, 0i64).matches(&r));
    }

    #[test]
    fn test_and_or_composition() {
        let r = record();
        let cond = Cond::leaf("domain_", Op::Eq, "RELIABILITY")
            .and(Cond::leaf("name_", Op::Eq, "NO_SUCH").or(Cond::leaf("PID", Op::Eq, 42i64)));
        assert!(cond.matches(&r));
    }
}
