//! Label selectors for list operations.
//!
//! Supports the equality-based and set-based forms:
//! `k=v`, `k==v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k`, `!k`,
//! joined with commas. An empty selector matches everything.

use crate::error::{TenancyResult, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

static LABEL_KEY: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r"^([a-z0-9]([-a-z0-9.]*[a-z0-9])?/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$")
});

static LABEL_VALUE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$"));

/// Operator of a single requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One clause of a selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub key: String,
    pub operator: SelectorOperator,
    pub values: BTreeSet<String>,
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::Equals | SelectorOperator::In => {
                value.is_some_and(|v| self.values.contains(v))
            }
            SelectorOperator::NotEquals | SelectorOperator::NotIn => {
                value.map_or(true, |v| !self.values.contains(v))
            }
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// Conjunction of requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Selector requiring every `key=value` pair in `labels`.
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let requirements = labels
            .into_iter()
            .map(|(k, v)| Requirement {
                key: k.to_string(),
                operator: SelectorOperator::Equals,
                values: BTreeSet::from([v.to_string()]),
            })
            .collect();
        Self { requirements }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn parse(input: &str) -> TenancyResult<Self> {
        let mut requirements = Vec::new();
        for clause in split_clauses(input) {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(input, clause)?);
        }
        Ok(Self { requirements })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self
            .requirements
            .iter()
            .map(|r| {
                let joined = r.values.iter().cloned().collect::<Vec<_>>().join(",");
                match r.operator {
                    SelectorOperator::Equals => format!("{}={}", r.key, joined),
                    SelectorOperator::NotEquals => format!("{}!={}", r.key, joined),
                    SelectorOperator::In => format!("{} in ({})", r.key, joined),
                    SelectorOperator::NotIn => format!("{} notin ({})", r.key, joined),
                    SelectorOperator::Exists => r.key.clone(),
                    SelectorOperator::DoesNotExist => format!("!{}", r.key),
                }
            })
            .collect();
        f.write_str(&clauses.join(","))
    }
}

/// Split on commas that are not inside parentheses.
fn split_clauses(input: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                clauses.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    clauses.push(&input[start..]);
    clauses
}

fn invalid(selector: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}

fn check_key(selector: &str, key: &str) -> Result<String, ValidationError> {
    let re = LABEL_KEY
        .as_ref()
        .map_err(|e| invalid(selector, format!("label key pattern unavailable: {}", e)))?;
    if key.len() > 317 || !re.is_match(key) {
        return Err(invalid(selector, format!("invalid label key {:?}", key)));
    }
    Ok(key.to_string())
}

fn check_value(selector: &str, value: &str) -> Result<String, ValidationError> {
    let re = LABEL_VALUE
        .as_ref()
        .map_err(|e| invalid(selector, format!("label value pattern unavailable: {}", e)))?;
    if value.len() > 63 || !re.is_match(value) {
        return Err(invalid(selector, format!("invalid label value {:?}", value)));
    }
    Ok(value.to_string())
}

fn parse_requirement(selector: &str, clause: &str) -> TenancyResult<Requirement> {
    if let Some(key) = clause.strip_prefix('!') {
        return Ok(Requirement {
            key: check_key(selector, key.trim())?,
            operator: SelectorOperator::DoesNotExist,
            values: BTreeSet::new(),
        });
    }

    for (token, operator) in [
        ("!=", SelectorOperator::NotEquals),
        ("==", SelectorOperator::Equals),
        ("=", SelectorOperator::Equals),
    ] {
        if let Some((key, value)) = clause.split_once(token) {
            return Ok(Requirement {
                key: check_key(selector, key.trim())?,
                operator,
                values: BTreeSet::from([check_value(selector, value.trim())?]),
            });
        }
    }

    for (token, operator) in [
        (" notin ", SelectorOperator::NotIn),
        (" in ", SelectorOperator::In),
    ] {
        if let Some((key, rest)) = clause.split_once(token) {
            let rest = rest.trim();
            let inner = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| invalid(selector, "set values must be parenthesized"))?;
            let values = inner
                .split(',')
                .map(|v| check_value(selector, v.trim()))
                .collect::<Result<BTreeSet<_>, _>>()?;
            if values.is_empty() {
                return Err(invalid(selector, "set must not be empty").into());
            }
            return Ok(Requirement {
                key: check_key(selector, key.trim())?,
                operator,
                values,
            });
        }
    }

    Ok(Requirement {
        key: check_key(selector, clause)?,
        operator: SelectorOperator::Exists,
        values: BTreeSet::new(),
    })
}
