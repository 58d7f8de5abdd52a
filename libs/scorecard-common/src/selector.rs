//! Label selector evaluation.
//!
//! A selector is a comma-separated conjunction of requirements over a
//! test's labels:
//!
//! | form               | matches when                               |
//! |--------------------|--------------------------------------------|
//! | `key=value`        | label `key` equals `value` (`==` also ok)  |
//! | `key!=value`       | label `key` is absent or differs           |
//! | `key in (a,b)`     | label `key` is one of the listed values    |
//! | `key notin (a,b)`  | label `key` is absent or none of the values|
//! | `key`              | label `key` exists                         |
//! | `!key`             | label `key` does not exist                 |
//!
//! The empty selector matches every label set.

use crate::error::{Result, ScorecardError};
use crate::types::{Labels, TestSpec};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    pub fn matches(&self, labels: &Labels) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => !labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid(raw, "empty requirement"));
        }

        if let Some(key) = raw.strip_prefix('!') {
            return Ok(Requirement::NotExists(parse_key(key.trim(), raw)?));
        }

        if let Some(open) = raw.find('(') {
            return Self::parse_set(raw, open);
        }

        if let Some((k, v)) = raw.split_once("!=") {
            return Ok(Requirement::NotEquals(parse_key(k.trim(), raw)?, parse_value(v.trim(), raw)?));
        }
        if let Some((k, v)) = raw.split_once("==") {
            return Ok(Requirement::Equals(parse_key(k.trim(), raw)?, parse_value(v.trim(), raw)?));
        }
        if let Some((k, v)) = raw.split_once('=') {
            return Ok(Requirement::Equals(parse_key(k.trim(), raw)?, parse_value(v.trim(), raw)?));
        }

        Ok(Requirement::Exists(parse_key(raw, raw)?))
    }

    fn parse_set(raw: &str, open: usize) -> Result<Self> {
        let head: Vec<&str> = raw[..open].split_whitespace().collect();
        let body = raw[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| invalid(raw, "missing closing parenthesis"))?;

        let (key, op) = match head.as_slice() {
            [key, op] => (parse_key(key, raw)?, *op),
            _ => return Err(invalid(raw, "expected `key in (...)` or `key notin (...)`")),
        };

        let mut values = BTreeSet::new();
        for value in body.split(',') {
            let value = value.trim();
            if value.is_empty() {
                return Err(invalid(raw, "empty value in set"));
            }
            values.insert(parse_value(value, raw)?);
        }

        match op {
            "in" => Ok(Requirement::In(key, values)),
            "notin" => Ok(Requirement::NotIn(key, values)),
            other => Err(invalid(raw, &format!("unknown set operator '{}'", other))),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &BTreeSet<String>| values.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::In(k, values) => write!(f, "{} in ({})", k, join(values)),
            Requirement::NotIn(k, values) => write!(f, "{} notin ({})", k, join(values)),
            Requirement::Exists(k) => write!(f, "{}", k),
            Requirement::NotExists(k) => write!(f, "!{}", k),
        }
    }
}

/// Parsed selector expression. The default value selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn parse(expression: &str) -> Result<Self> {
        if expression.trim().is_empty() {
            return Ok(Self::default());
        }

        let requirements = split_top_level(expression)
            .into_iter()
            .map(Requirement::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Tests whose labels satisfy this selector, in catalog order.
    pub fn select<'a>(&self, tests: &'a [TestSpec]) -> Vec<&'a TestSpec> {
        tests.iter().filter(|t| self.matches(&t.labels)).collect()
    }
}

impl FromStr for Selector {
    type Err = ScorecardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Split on commas that are not inside a parenthesised value set.
fn split_top_level(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in expression.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&expression[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
}

fn parse_key(key: &str, raw: &str) -> Result<String> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !valid {
        return Err(invalid(raw, &format!("invalid label key '{}'", key)));
    }
    Ok(key.to_string())
}

fn parse_value(value: &str, raw: &str) -> Result<String> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(invalid(raw, &format!("invalid label value '{}'", value)));
    }
    Ok(value.to_string())
}

fn invalid(raw: &str, reason: &str) -> ScorecardError {
    ScorecardError::Config(format!("invalid selector '{}': {}", raw, reason))
}
