//! Canonical state dictionaries.
//!
//! Desired state (cdict) and observed state (sdict) are both expressed as
//! ordered aspect -> value maps over the same vocabulary, so comparing them
//! is always aspect-by-aspect. An empty dict means "does not exist" on the
//! observed side and "should not exist" on the desired side.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A single observable value within a state dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Text(String),
    Bool(bool),
    Int(i64),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Aspect name -> value, ordered for stable diffing and hashing.
pub type StateDict = BTreeMap<String, StateValue>;

/// The aspects of `cdict` that `sdict` does not satisfy.
///
/// Only keys present in the desired dict are compared; extra observed keys
/// (e.g. `size`) never count against correctness.
pub fn diff_keys(cdict: &StateDict, sdict: &StateDict) -> Vec<String> {
    cdict
        .iter()
        .filter(|(key, value)| sdict.get(*key) != Some(value))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Stable content hash of a state dictionary.
pub fn hash_statedict(dict: &StateDict) -> String {
    let mut hasher = blake3::Hasher::new();
    for (key, value) in dict {
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.to_string().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// One human-readable diff line for an aspect, observed vs desired.
pub fn diff_line(key: &str, observed: Option<&StateValue>, desired: Option<&StateValue>) -> String {
    let render = |v: Option<&StateValue>| match v {
        Some(value) => value.to_string(),
        None => "<absent>".to_string(),
    };
    format!("{key}: {} → {}", render(observed), render(desired))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&str, StateValue)]) -> StateDict {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn diff_is_over_desired_keys_only() {
        let cdict = dict(&[("type", "file".into()), ("mode", "0644".into())]);
        let sdict = dict(&[
            ("type", "file".into()),
            ("mode", "0755".into()),
            ("size", StateValue::Int(12)),
        ]);
        assert_eq!(diff_keys(&cdict, &sdict), vec!["mode"]);
    }

    #[test]
    fn missing_observed_key_needs_fixing() {
        let cdict = dict(&[("type", "file".into()), ("owner", "root".into())]);
        let sdict = dict(&[("type", "file".into())]);
        assert_eq!(diff_keys(&cdict, &sdict), vec!["owner"]);
    }

    #[test]
    fn equal_dicts_diff_empty() {
        let cdict = dict(&[("running", true.into())]);
        assert!(diff_keys(&cdict, &cdict.clone()).is_empty());
    }

    #[test]
    fn hash_is_stable_and_order_independent() {
        let a = dict(&[("mode", "0644".into()), ("type", "file".into())]);
        let mut b = StateDict::new();
        b.insert("type".to_string(), "file".into());
        b.insert("mode".to_string(), "0644".into());
        assert_eq!(hash_statedict(&a), hash_statedict(&b));
        assert_ne!(hash_statedict(&a), hash_statedict(&StateDict::new()));
    }

    #[test]
    fn diff_line_renders_absent_sides() {
        let desired = StateValue::from("0644");
        assert_eq!(diff_line("mode", None, Some(&desired)), "mode: <absent> → 0644");
    }
}
