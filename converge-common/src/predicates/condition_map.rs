//! Operator-style condition maps and exact matching against them.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use super::{Predicate, SnapshotParseError};
use crate::fetch::Summarize;
use crate::poll::Decision;

/// Condition name → observed value, e.g. `Available → True`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionState {
    conditions: BTreeMap<String, String>,
}

impl ConditionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.conditions.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.conditions.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.conditions
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse `NAME=VALUE` pairs separated by commas or whitespace.
    pub fn parse_pairs(input: &str) -> Result<Self, SnapshotParseError> {
        let mut state = Self::new();
        for (idx, pair) in input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .enumerate()
        {
            let (name, value) = pair.split_once('=').ok_or_else(|| SnapshotParseError::Line {
                line: idx + 1,
                message: format!("expected NAME=VALUE, got '{}'", pair),
            })?;
            if name.is_empty() {
                return Err(SnapshotParseError::Line {
                    line: idx + 1,
                    message: format!("empty condition name in '{}'", pair),
                });
            }
            state.insert(name, value);
        }
        Ok(state)
    }

    /// Parse a Kubernetes-style condition list.
    ///
    /// Accepts the bare `[{"type": ..., "status": ...}]` array, an object
    /// carrying it under `conditions`, or a full resource carrying it under
    /// `status.conditions`.
    pub fn from_conditions_json(input: &str) -> Result<Self, SnapshotParseError> {
        let value: Value =
            serde_json::from_str(input).map_err(|e| SnapshotParseError::Json(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, SnapshotParseError> {
        let list = match value {
            Value::Array(items) => items,
            Value::Object(map) => map
                .get("status")
                .and_then(|s| s.get("conditions"))
                .or_else(|| map.get("conditions"))
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    SnapshotParseError::Shape("object has no conditions array".to_string())
                })?,
            Value::Null => return Ok(Self::new()),
            other => {
                return Err(SnapshotParseError::Shape(format!(
                    "expected array or object, got {}",
                    json_kind(other)
                )));
            }
        };

        let mut state = Self::new();
        for (idx, item) in list.iter().enumerate() {
            let name = item.get("type").and_then(Value::as_str).ok_or_else(|| {
                SnapshotParseError::Shape(format!("condition {} has no string 'type'", idx))
            })?;
            let status = match item.get("status") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Bool(b)) => if *b { "True" } else { "False" }.to_string(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            state.insert(name, status);
        }
        Ok(state)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for ConditionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.conditions {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConditionState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut state = Self::new();
        for (k, v) in iter {
            state.insert(k, v);
        }
        state
    }
}

impl Summarize for ConditionState {
    fn summarize(&self) -> String {
        if self.is_empty() {
            "<no conditions>".to_string()
        } else {
            self.to_string()
        }
    }
}

/// Satisfied iff every expected condition is present with an identical value.
/// Extra observed conditions are ignored. Never fatal.
#[derive(Debug, Clone)]
pub struct ConditionMatch {
    expected: ConditionState,
}

impl ConditionMatch {
    pub fn new(expected: ConditionState) -> Self {
        Self { expected }
    }

    pub fn expected(&self) -> &ConditionState {
        &self.expected
    }

    /// Expected conditions whose observed value differs or is missing.
    pub fn mismatches<'a>(&'a self, observed: &'a ConditionState) -> Vec<(&'a str, Option<&'a str>)> {
        self.expected
            .iter()
            .filter_map(|(name, want)| match observed.get(name) {
                Some(got) if got == want => None,
                got => Some((name, got)),
            })
            .collect()
    }
}

impl Predicate<ConditionState> for ConditionMatch {
    fn decide(&self, observed: &ConditionState) -> Decision {
        if self.mismatches(observed).is_empty() {
            Decision::Satisfied
        } else {
            Decision::NotYet
        }
    }
}
