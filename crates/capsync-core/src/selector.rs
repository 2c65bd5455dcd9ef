//! Label selectors for filtering listed definitions.
//!
//! Accepts the Kubernetes selector syntax: comma-separated requirements that
//! must all hold.
//!
//! - `key=value`, `key==value`, `key!=value`
//! - `key`, `!key`
//! - `key in (a, b)`, `key notin (a, b)`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty requirement in selector")]
    EmptyRequirement,
    #[error("invalid label key: {0:?}")]
    InvalidKey(String),
    #[error("invalid value set in requirement: {0}")]
    InvalidSet(String),
    #[error("unbalanced parentheses in selector: {0}")]
    Unbalanced(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            // Missing keys satisfy inequality, as in Kubernetes.
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::Exists(k) => labels.contains_key(k),
            Self::NotExists(k) => !labels.contains_key(k),
            Self::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Self::NotIn(k, values) => !labels.get(k).is_some_and(|v| values.contains(v)),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(k, v) => write!(f, "{k}={v}"),
            Self::NotEquals(k, v) => write!(f, "{k}!={v}"),
            Self::Exists(k) => write!(f, "{k}"),
            Self::NotExists(k) => write!(f, "!{k}"),
            Self::In(k, values) => write!(f, "{k} in ({})", values.join(",")),
            Self::NotIn(k, values) => write!(f, "{k} notin ({})", values.join(",")),
        }
    }
}

/// A parsed label selector. The empty selector matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector that matches every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for part in split_top_level(input)? {
            let part = part.trim();
            if part.is_empty() {
                if input.trim().is_empty() {
                    continue;
                }
                return Err(SelectorError::EmptyRequirement);
            }
            requirements.push(parse_requirement(part)?);
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

/// Split on commas that are not inside a `( ... )` value set.
fn split_top_level(input: &str) -> Result<Vec<&str>, SelectorError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::Unbalanced(input.to_string()))?;
            }
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::Unbalanced(input.to_string()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn parse_requirement(part: &str) -> Result<Requirement, SelectorError> {
    if let Some(key) = part.strip_prefix('!') {
        return Ok(Requirement::NotExists(validate_key(key.trim())?));
    }
    if let Some((key, value)) = part.split_once("!=") {
        return Ok(Requirement::NotEquals(
            validate_key(key.trim())?,
            value.trim().to_string(),
        ));
    }
    if let Some((key, value)) = part.split_once("==") {
        return Ok(Requirement::Equals(
            validate_key(key.trim())?,
            value.trim().to_string(),
        ));
    }
    if let Some((key, value)) = part.split_once('=') {
        return Ok(Requirement::Equals(
            validate_key(key.trim())?,
            value.trim().to_string(),
        ));
    }
    if let Some((key, rest)) = part.split_once(" notin ") {
        return Ok(Requirement::NotIn(
            validate_key(key.trim())?,
            parse_set(rest)?,
        ));
    }
    if let Some((key, rest)) = part.split_once(" in ") {
        return Ok(Requirement::In(validate_key(key.trim())?, parse_set(rest)?));
    }
    Ok(Requirement::Exists(validate_key(part)?))
}

fn parse_set(rest: &str) -> Result<Vec<String>, SelectorError> {
    let inner = rest
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| SelectorError::InvalidSet(rest.trim().to_string()))?;
    let values: Vec<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(SelectorError::InvalidSet(rest.trim().to_string()));
    }
    Ok(values)
}

fn validate_key(key: &str) -> Result<String, SelectorError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if valid {
        Ok(key.to_string())
    } else {
        Err(SelectorError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = LabelSelector::parse("").unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&labels(&[])));
        assert!(sel.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn equality_requirements() {
        let sel = LabelSelector::parse("app=web, tier==frontend").unwrap();
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "frontend")])));
        assert!(!sel.matches(&labels(&[("app", "web")])));
        assert!(!sel.matches(&labels(&[("app", "db"), ("tier", "frontend")])));
    }

    #[test]
    fn inequality_matches_missing_key() {
        let sel = LabelSelector::parse("env!=prod").unwrap();
        assert!(sel.matches(&labels(&[])));
        assert!(sel.matches(&labels(&[("env", "dev")])));
        assert!(!sel.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn existence_requirements() {
        let sel = LabelSelector::parse("oam.dev/system,!deprecated").unwrap();
        assert!(sel.matches(&labels(&[("oam.dev/system", "")])));
        assert!(!sel.matches(&labels(&[("oam.dev/system", "x"), ("deprecated", "1")])));
        assert!(!sel.matches(&labels(&[])));
    }

    #[test]
    fn set_requirements() {
        let sel = LabelSelector::parse("env in (dev, staging),team notin (ops)").unwrap();
        assert!(sel.matches(&labels(&[("env", "dev")])));
        assert!(sel.matches(&labels(&[("env", "staging"), ("team", "apps")])));
        assert!(!sel.matches(&labels(&[("env", "prod")])));
        assert!(!sel.matches(&labels(&[("env", "dev"), ("team", "ops")])));
    }

    #[test]
    fn display_round_trips_through_parse() {
        let sel = LabelSelector::parse("a=b,c!=d,e,!f,g in (h,i)").unwrap();
        let reparsed = LabelSelector::parse(&sel.to_string()).unwrap();
        assert_eq!(sel, reparsed);
    }

    #[test]
    fn rejects_malformed_selectors() {
        assert!(matches!(
            LabelSelector::parse("a=b,,c"),
            Err(SelectorError::EmptyRequirement)
        ));
        assert!(matches!(
            LabelSelector::parse("env in (dev"),
            Err(SelectorError::Unbalanced(_))
        ));
        assert!(matches!(
            LabelSelector::parse("env in ()"),
            Err(SelectorError::InvalidSet(_))
        ));
        assert!(matches!(
            LabelSelector::parse("bad key=1"),
            Err(SelectorError::InvalidKey(_))
        ));
    }
}
