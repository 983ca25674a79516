//! # ConditionParser — Filter Text to Predicate Tree
//!
//! Parses the JSON condition grammar callers attach to query rules:
//!
//! ```json
//! {"version":"V1","condition":{"and":[{"param":"NAME","op":"=","value":"X"}]}}
//! ```
//!
//! The root must carry a `version` string (presence required, value
//! ignored) and a `condition` object holding exactly one `"and"` or
//! `"or"` array. Each clause is either a nested logic object or a leaf
//! with exactly the three keys `param`, `op`, `value`. There is no
//! partial success: any malformed clause fails the whole parse.
//!
//! Successful parses are memoized by the exact input string. Filter
//! strings come from a small, mostly static configuration set, so the
//! cache is never evicted.

use std::collections::HashMap;
use std::sync::Mutex;

use dg_core::{Cond, CondValue, Op};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("condition text is empty")]
    Empty,

    #[error("condition text is not well-formed JSON")]
    InvalidJson,

    #[error("condition root must carry a `version` string and a `condition` object")]
    BadRoot,

    #[error("logic node must hold exactly one `and` or `or` clause array")]
    BadLogicNode,

    #[error("leaf clause must hold exactly `param`, `op` and `value`")]
    BadLeaf,

    #[error("unknown operator `{0}`")]
    UnknownOp(String),

    #[error("`value` must be a scalar string, integer or float")]
    NonScalarValue,
}

/// Parses condition text into [`Cond`] trees, memoizing successes.
///
/// Safe to share between threads; the cache is guarded by a single lock
/// and contention stays low because keys are drawn from configuration,
/// not request volume.
#[derive(Default)]
pub struct ConditionParser {
    cache: Mutex<HashMap<String, Cond>>,
}

impl ConditionParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, text: &str) -> Result<Cond, ParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        if let Some(hit) = self.cache.lock().unwrap().get(text) {
            return Ok(hit.clone());
        }
        let cond = parse_uncached(text)?;
        self.cache
            .lock()
            .unwrap()
            .insert(text.to_string(), cond.clone());
        Ok(cond)
    }

    /// Number of distinct filter strings memoized so far.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

fn parse_uncached(text: &str) -> Result<Cond, ParseError> {
    let root: Value = serde_json::from_str(text).map_err(|_| ParseError::InvalidJson)?;
    let root = root.as_object().ok_or(ParseError::BadRoot)?;
    root.get("version")
        .and_then(Value::as_str)
        .ok_or(ParseError::BadRoot)?;
    let condition = root.get("condition").ok_or(ParseError::BadRoot)?;
    parse_logic_node(condition)
}

fn parse_logic_node(node: &Value) -> Result<Cond, ParseError> {
    let obj = node.as_object().ok_or(ParseError::BadLogicNode)?;
    if obj.len() != 1 {
        return Err(ParseError::BadLogicNode);
    }
    let (logic, clauses) = obj.iter().next().ok_or(ParseError::BadLogicNode)?;
    if logic != "and" && logic != "or" {
        return Err(ParseError::BadLogicNode);
    }
    let clauses = clauses.as_array().ok_or(ParseError::BadLogicNode)?;

    let mut iter = clauses.iter();
    let first = iter.next().ok_or(ParseError::BadLogicNode)?;
    let mut cond = parse_clause(first)?;
    for clause in iter {
        let sub = parse_clause(clause)?;
        cond = if logic == "and" {
            cond.and(sub)
        } else {
            cond.or(sub)
        };
    }
    Ok(cond)
}

fn parse_clause(clause: &Value) -> Result<Cond, ParseError> {
    let obj = clause.as_object().ok_or(ParseError::BadLeaf)?;
    // A single "and"/"or" key nests another logic level.
    if obj.len() == 1 && (obj.contains_key("and") || obj.contains_key("or")) {
        return parse_logic_node(clause);
    }
    if obj.len() != 3 {
        return Err(ParseError::BadLeaf);
    }
    let param = obj
        .get("param")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .ok_or(ParseError::BadLeaf)?;
    let op = obj
        .get("op")
        .and_then(Value::as_str)
        .ok_or(ParseError::BadLeaf)?;
    let op = op_from_str(op)?;
    let value = obj.get("value").ok_or(ParseError::BadLeaf)?;
    let value = CondValue::from_json(value).ok_or(ParseError::NonScalarValue)?;
    Ok(Cond::leaf(param, op, value))
}

fn op_from_str(op: &str) -> Result<Op, ParseError> {
    match op {
        "=" => Ok(Op::Eq),
        "!=" => Ok(Op::Ne),
        ">" => Ok(Op::Gt),
        ">=" => Ok(Op::Ge),
        "<" => Ok(Op::Lt),
        "<=" => Ok(Op::Le),
        other => Err(ParseError::UnknownOp(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str =
        r#"{"version":"V1","condition":{"and":[{"param":"NAME","op":"=","value":"X"}]}}"#;

    #[test]
    fn test_simple_condition_yields_one_leaf() {
        let parser = ConditionParser::new();
        let cond = parser.parse(SIMPLE).unwrap();
        assert_eq!(cond, Cond::leaf("NAME", Op::Eq, "X"));
    }

    #[test]
    fn test_parsing_is_deterministic_and_memoized() {
        let parser = ConditionParser::new();
        let first = parser.parse(SIMPLE).unwrap();
        assert_eq!(parser.cache_len(), 1);
        let second = parser.parse(SIMPLE).unwrap();
        assert_eq!(first, second);
        assert_eq!(parser.cache_len(), 1);

        // A fresh parser (no cache hit) must yield a structurally equal tree.
        assert_eq!(ConditionParser::new().parse(SIMPLE).unwrap(), first);
    }

    #[test]
    fn test_multiple_clauses_fold_left_to_right() {
        let parser = ConditionParser::new();
        let text = r#"{"version":"V1","condition":{"and":[
            {"param":"NAME","op":"=","value":"SysEventService"},
            {"param":"uid_","op":"=","value":1201}]}}"#;
        let cond = parser.parse(text).unwrap();
        assert_eq!(
            cond,
            Cond::leaf("NAME", Op::Eq, "SysEventService").and(Cond::leaf("uid_", Op::Eq, 1201i64))
        );
    }

    #[test]
    fn test_nested_logic_objects_recurse() {
        let parser = ConditionParser::new();
        let text = r#"{"version":"V1","condition":{"or":[
            {"and":[{"param":"type_","op":">","value":0},{"param":"uid_","op":"=","value":1201}]},
            {"param":"NAME","op":"=","value":"X"}]}}"#;
        let cond = parser.parse(text).unwrap();
        let nested =
            Cond::leaf("type_", Op::Gt, 0i64).and(Cond::leaf("uid_", Op::Eq, 1201i64));
        assert_eq!(cond, nested.or(Cond::leaf("NAME", Op::Eq, "X")));
    }

    #[test]
    fn test_empty_input_fails() {
        let parser = ConditionParser::new();
        assert_eq!(parser.parse(""), Err(ParseError::Empty));
        assert_eq!(parser.parse("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_non_json_input_fails() {
        let parser = ConditionParser::new();
        assert_eq!(parser.parse("not json"), Err(ParseError::InvalidJson));
    }

    #[test]
    fn test_missing_leaf_keys_fail_the_whole_parse() {
        let parser = ConditionParser::new();
        // `param`/`op`/`value` replaced or misspelled, one clause at a time.
        let wrong_param = r#"{"version":"V1","condition":{"and":[
            {"param1":"type_","op":">","value":0},{"param2":"uid_","op":"=","value":1201}]}}"#;
        assert_eq!(parser.parse(wrong_param), Err(ParseError::BadLeaf));

        let wrong_op = r#"{"version":"V1","condition":{"and":[
            {"param":"type_","op1":">","value":0}]}}"#;
        assert_eq!(parser.parse(wrong_op), Err(ParseError::BadLeaf));

        let wrong_value = r#"{"version":"V1","condition":{"and":[
            {"param":"type_","op":">","value11":0}]}}"#;
        assert_eq!(parser.parse(wrong_value), Err(ParseError::BadLeaf));
    }

    #[test]
    fn test_empty_param_fails() {
        let parser = ConditionParser::new();
        let text = r#"{"version":"V1","condition":{"and":[{"param":"","op":">","value":0}]}}"#;
        assert_eq!(parser.parse(text), Err(ParseError::BadLeaf));
    }

    #[test]
    fn test_unknown_operator_fails() {
        let parser = ConditionParser::new();
        let text =
            r#"{"version":"V1","condition":{"and":[{"param":"a","op":"~","value":0}]}}"#;
        assert_eq!(parser.parse(text), Err(ParseError::UnknownOp("~".into())));
    }

    #[test]
    fn test_array_value_fails() {
        let parser = ConditionParser::new();
        let text =
            r#"{"version":"V1","condition":{"and":[{"param":"type_","op":">","value":[]}]}}"#;
        assert_eq!(parser.parse(text), Err(ParseError::NonScalarValue));
    }

    #[test]
    fn test_object_bool_and_null_values_fail() {
        let parser = ConditionParser::new();
        for value in ["{}", "true", "null"] {
            let text = format!(
                r#"{{"version":"V1","condition":{{"and":[{{"param":"a","op":"=","value":{value}}}]}}}}"#
            );
            assert_eq!(parser.parse(&text), Err(ParseError::NonScalarValue));
        }
    }

    #[test]
    fn test_wrong_root_shapes_fail() {
        let parser = ConditionParser::new();
        // No `condition` key.
        let renamed = r#"{"version":"V1","condition1":{"and":[{"param":"a","op":"=","value":0}]}}"#;
        assert_eq!(parser.parse(renamed), Err(ParseError::BadRoot));
        // No `version` key.
        let unversioned = r#"{"condition":{"and":[{"param":"a","op":"=","value":0}]}}"#;
        assert_eq!(parser.parse(unversioned), Err(ParseError::BadRoot));
        // `condition` is not an object.
        let scalar = r#"{"version":"V1","condition":1}"#;
        assert_eq!(parser.parse(scalar), Err(ParseError::BadLogicNode));
    }

    #[test]
    fn test_unknown_version_string_is_accepted() {
        // The version tag is informational only; parsing ignores its value.
        let parser = ConditionParser::new();
        let text = r#"{"version":"V2","condition":{"and":[{"param":"a","op":"=","value":0}]}}"#;
        assert!(parser.parse(text).is_ok());
    }

    #[test]
    fn test_mixed_logic_key_counts_fail() {
        let parser = ConditionParser::new();
        let two_keys = r#"{"version":"V1","condition":{
            "and":[{"param":"a","op":"=","value":0}],
            "or":[{"param":"b","op":"=","value":1}]}}"#;
        assert_eq!(parser.parse(two_keys), Err(ParseError::BadLogicNode));

        let empty_clauses = r#"{"version":"V1","condition":{"and":[]}}"#;
        assert_eq!(parser.parse(empty_clauses), Err(ParseError::BadLogicNode));
    }

    #[test]
    fn test_failures_are_not_cached() {
        let parser = ConditionParser::new();
        assert!(parser.parse("garbage").is_err());
        assert_eq!(parser.cache_len(), 0);
    }
}
