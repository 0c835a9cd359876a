//! SQL executors
//!
//! [`sqlite`] and [`pgsql`] run a configured statement template against
//! pooled connections. The call payload selects the execution mode:
//!
//! - no `value` — bare execute,
//! - `value` as a mapping — named parameters (`:name`), rewritten to the
//!   database's positional binds,
//! - `value` as a list of rows — executemany inside one transaction,
//! - `value` as a flat list — a single positional-bind execute.
//!
//! Statements commit on success and roll back on database error (code
//! 102). Successful calls return `{"resultset": rows}` with each row as a
//! list of JSON scalars.

use flowgraph_core::registry::OperatorRegistry;
use serde_json::{Map, Value};

pub mod pgsql;
pub mod sqlite;

/// Register both SQL executors.
pub fn register(registry: &mut OperatorRegistry) {
    sqlite::register(registry);
    pgsql::register(registry);
}

/// Positional bind syntax of the target database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindStyle {
    /// SQLite `?`
    Question,
    /// PostgreSQL `$1`, `$2`, ...
    Dollar,
}

/// Substitute `{name}` placeholders into a statement template.
///
/// This is textual substitution for identifiers (table names, columns),
/// not value binding; values go through the bind path.
pub(crate) fn substitute_placeholders(
    statement: &str,
    placeholders: Option<&Map<String, Value>>,
) -> String {
    let Some(map) = placeholders else {
        return statement.to_string();
    };
    let mut out = statement.to_string();
    for (key, value) in map {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out = out.replace(&format!("{{{}}}", key), &text);
    }
    out
}

/// Rewrite `:name` parameters to positional binds, returning the rewritten
/// statement and the bind values in occurrence order.
///
/// A `::` sequence (cast syntax) is left alone. A referenced name missing
/// from the parameter map is an error.
pub(crate) fn rewrite_named(
    statement: &str,
    params: &Map<String, Value>,
    style: BindStyle,
) -> Result<(String, Vec<Value>), String> {
    let bytes = statement.as_bytes();
    let mut out = String::with_capacity(statement.len());
    let mut binds = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b':' {
            // Skip casts and any leading colon run.
            if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                out.push_str("::");
                i += 2;
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }
            if end > start && !bytes[start].is_ascii_digit() {
                let name = &statement[start..end];
                let value = params
                    .get(name)
                    .ok_or_else(|| format!("missing parameter '{}'", name))?;
                binds.push(value.clone());
                match style {
                    BindStyle::Question => out.push('?'),
                    BindStyle::Dollar => out.push_str(&format!("${}", binds.len())),
                }
                i = end;
                continue;
            }
        }
        // Safe: we only ever stand on char boundaries for ASCII ':'.
        let ch = statement[i..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
        i += ch.len_utf8();
    }

    Ok((out, binds))
}
