//! Environment-variable substitution in configuration strings
//!
//! Supported forms:
//!
//! - `$NAME` and `${NAME}` — the variable's value, empty when unset,
//! - `${NAME-default}` — `default` when unset,
//! - `${NAME:-default}` — `default` when unset or empty,
//! - `\$` — escaped; the reference is left untouched (backslash included),
//!   which keeps substitution idempotent on already-resolved strings.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

fn simple_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\\?)\$([A-Za-z0-9_]+)").unwrap())
}

fn extended_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\\?)\$\{([A-Za-z0-9_]+)(?:(:?-)([^}]*))?\}").unwrap())
}

/// Expand environment-variable references in `input`
pub fn expand_str(input: &str) -> String {
    let pass1 = extended_re().replace_all(input, |caps: &Captures| {
        if !caps[1].is_empty() {
            return caps[0].to_string();
        }
        let value = std::env::var(&caps[2]).ok();
        match (caps.get(3).map(|m| m.as_str()), caps.get(4)) {
            (Some(":-"), Some(default)) => match value {
                Some(v) if !v.is_empty() => v,
                _ => default.as_str().to_string(),
            },
            (Some("-"), Some(default)) => value.unwrap_or_else(|| default.as_str().to_string()),
            _ => value.unwrap_or_default(),
        }
    });

    simple_re()
        .replace_all(&pass1, |caps: &Captures| {
            if !caps[1].is_empty() {
                return caps[0].to_string();
            }
            std::env::var(&caps[2]).unwrap_or_default()
        })
        .to_string()
}

/// Expand environment-variable references in every string of a JSON value.
///
/// Used on operator configuration bags before they are deserialized, so any
/// configured string may carry references.
pub fn expand_value(input: &Value) -> Value {
    match input {
        Value::String(s) => Value::String(expand_str(s)),
        Value::Array(xs) => Value::Array(xs.iter().map(expand_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
