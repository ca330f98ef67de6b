//! Label-selector expressions used to scope namespaces
//!
//! The grammar follows the Kubernetes label selector syntax. Only the
//! existence operators can be evaluated against a namespace name; every
//! other operator parses but is rejected when the selector is used.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Errors raised while parsing or evaluating a selector
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectorError {
    #[error("invalid selector '{input}': {reason}")]
    Syntax { input: String, reason: String },

    #[error("invalid label key '{0}'")]
    InvalidKey(String),

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(Operator),
}

/// Requirement operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Exists,
    DoesNotExist,
    Equals,
    NotEquals,
    In,
    NotIn,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Exists => "exists",
            Operator::DoesNotExist => "!",
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::In => "in",
            Operator::NotIn => "notin",
        };
        f.write_str(s)
    }
}

/// A single `key <op> values` term
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: BTreeSet<String>,
}

impl Requirement {
    /// Match against a set of label keys that all carry the empty value.
    ///
    /// This is how a namespace name is evaluated: the name is the only key.
    pub fn matches_key(&self, key: &str) -> bool {
        let present = self.key == key;
        match self.operator {
            Operator::Exists => present,
            Operator::DoesNotExist => !present,
            Operator::Equals | Operator::In => present && self.values.contains(""),
            Operator::NotEquals | Operator::NotIn => !present || !self.values.contains(""),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<&str> = self.values.iter().map(String::as_str).collect();
        match self.operator {
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
            Operator::Equals => write!(f, "{}={}", self.key, values.join(",")),
            Operator::NotEquals => write!(f, "{}!={}", self.key, values.join(",")),
            Operator::In => write!(f, "{} in ({})", self.key, values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, values.join(",")),
        }
    }
}

/// Parsed namespace selector; empty means "every namespace"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespaceSelector {
    requirements: Vec<Requirement>,
}

impl NamespaceSelector {
    /// Parse a selector expression. Blank input yields the empty selector.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for term in split_terms(input)? {
            requirements.push(parse_term(input, &term)?);
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Fails if any requirement uses an operator that cannot be evaluated
    /// against namespace names.
    pub fn ensure_supported(&self) -> Result<(), SelectorError> {
        for req in &self.requirements {
            match req.operator {
                Operator::Exists | Operator::DoesNotExist => {}
                other => return Err(SelectorError::UnsupportedOperator(other)),
            }
        }
        Ok(())
    }

    /// The single namespace this selector pins, if it is exactly one
    /// existence term. Used to narrow the pod listing.
    pub fn single_namespace(&self) -> Option<&str> {
        match self.requirements.as_slice() {
            [req] if req.operator == Operator::Exists => Some(req.key.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for NamespaceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&terms.join(","))
    }
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$",
        )
        .expect("label key pattern is valid")
    })
}

fn validate_key(key: &str) -> Result<String, SelectorError> {
    let name = key.rsplit('/').next().unwrap_or(key);
    if name.len() > 63 || !key_pattern().is_match(key) {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(key.to_string())
}

/// Split on top-level commas; commas inside `( )` belong to a value set.
fn split_terms(input: &str) -> Result<Vec<String>, SelectorError> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in input.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| SelectorError::Syntax {
                    input: input.to_string(),
                    reason: "unbalanced ')'".to_string(),
                })?;
                current.push(c);
            }
            ',' if depth == 0 => {
                terms.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if depth != 0 {
        return Err(SelectorError::Syntax {
            input: input.to_string(),
            reason: "unbalanced '('".to_string(),
        });
    }
    terms.push(current);

    let trimmed: Vec<String> = terms.iter().map(|t| t.trim().to_string()).collect();
    if trimmed.len() == 1 && trimmed[0].is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.iter().any(|t| t.is_empty()) {
        return Err(SelectorError::Syntax {
            input: input.to_string(),
            reason: "empty term".to_string(),
        });
    }
    Ok(trimmed)
}

fn parse_term(input: &str, term: &str) -> Result<Requirement, SelectorError> {
    let syntax = |reason: &str| SelectorError::Syntax {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if let Some(rest) = term.strip_prefix('!') {
        return Ok(Requirement {
            key: validate_key(rest.trim())?,
            operator: Operator::DoesNotExist,
            values: BTreeSet::new(),
        });
    }

    if let Some((key, value)) = term.split_once("!=") {
        return single_value(key, Operator::NotEquals, value);
    }
    if let Some((key, value)) = term.split_once("==") {
        return single_value(key, Operator::Equals, value);
    }
    if let Some((key, value)) = term.split_once('=') {
        return single_value(key, Operator::Equals, value);
    }

    let mut parts = term.splitn(2, char::is_whitespace);
    let key = parts.next().unwrap_or_default();
    let rest = parts.next().map(str::trim).unwrap_or_default();

    if rest.is_empty() {
        return Ok(Requirement {
            key: validate_key(key)?,
            operator: Operator::Exists,
            values: BTreeSet::new(),
        });
    }

    let (operator, set) = if let Some(set) = rest.strip_prefix("notin") {
        (Operator::NotIn, set)
    } else if let Some(set) = rest.strip_prefix("in") {
        (Operator::In, set)
    } else {
        return Err(syntax("expected 'in' or 'notin'"));
    };

    let set = set.trim();
    let inner = set
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| syntax("value set must be parenthesised"))?;
    let values: BTreeSet<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(syntax("empty value set"));
    }

    Ok(Requirement {
        key: validate_key(key)?,
        operator,
        values,
    })
}

fn single_value(key: &str, operator: Operator, value: &str) -> Result<Requirement, SelectorError> {
    let mut values = BTreeSet::new();
    values.insert(value.trim().to_string());
    Ok(Requirement {
        key: validate_key(key.trim())?,
        operator,
        values,
    })
}
