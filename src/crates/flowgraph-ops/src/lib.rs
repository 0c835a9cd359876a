//! # flowgraph-ops
//!
//! The built-in operator set for flowgraph pipelines:
//!
//! - [`http`] — REST, feed, and HTML requesters over a shared retrying
//!   client core,
//! - [`sql`] — SQLite and PostgreSQL executors over pooled connections,
//! - [`mpd`] — music-daemon socket executor (line protocol),
//! - [`jwt`] — token encode/decode with digest-indexed key sets,
//! - [`crypto`] — symmetric encrypt/decrypt of string payloads,
//! - [`buffer`] / [`file`] — JSON/YAML/TOML value ⇄ string/file bridges,
//! - [`sleep`] — fixed and randomized pacing,
//! - [`env`] — environment variable reads,
//! - [`transform`] — the data transformer over the collaborator seam.
//!
//! Operators register themselves into an
//! [`OperatorRegistry`](flowgraph_core::OperatorRegistry) through
//! [`register_defaults`] or per-group via [`load_extension`], which is what
//! the CLI's `ext` configuration key maps onto.

use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::registry::OperatorRegistry;
use flowgraph_core::util::envvar::expand_value;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod buffer;
pub mod crypto;
pub mod env;
pub mod file;
pub mod http;
pub mod jwt;
pub mod mpd;
pub mod sleep;
pub mod sql;
pub mod transform;

/// Version every built-in operator is registered under
pub const OPERATOR_VERSION: &str = "1.0";

/// Register every built-in operator
pub fn register_defaults(registry: &mut OperatorRegistry) {
    http::register(registry);
    sql::register(registry);
    mpd::register(registry);
    jwt::register(registry);
    crypto::register(registry);
    buffer::register(registry);
    file::register(registry);
    sleep::register(registry);
    env::register(registry);
    transform::register(registry);
}

/// Register one extension group by name.
///
/// Configuration `ext` entries map onto these names.
pub fn load_extension(name: &str, registry: &mut OperatorRegistry) -> Result<()> {
    match name {
        "http" => http::register(registry),
        "sql" => sql::register(registry),
        "mpd" => mpd::register(registry),
        "jwt" => jwt::register(registry),
        "crypto" => crypto::register(registry),
        "buffer" => buffer::register(registry),
        "file" => file::register(registry),
        "sleep" => sleep::register(registry),
        "env" => env::register(registry),
        "transform" => transform::register(registry),
        other => {
            return Err(FlowError::configuration(format!(
                "unknown extension '{}'",
                other
            )))
        }
    }
    Ok(())
}

/// Deserialize an operator configuration bag after env-var expansion.
///
/// A null bag reads as an empty mapping so operators with all-default
/// configuration need no `config` key at all.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Value) -> Result<T> {
    let expanded = match expand_value(config) {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };
    serde_json::from_value(expanded).map_err(|e| FlowError::configuration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_defaults_covers_all_typenames() {
        let mut registry = OperatorRegistry::new();
        register_defaults(&mut registry);

        for typename in [
            "RestApiRequester",
            "FeedRequester",
            "HtmlRequester",
            "SqLiteExecutor",
            "PgSqlExecutor",
            "MpdExecutor",
            "JwtOperator",
            "CryptoOperator",
            "JsonBufferOperator",
            "YamlBufferOperator",
            "TomlBufferOperator",
            "AnyFileOperator",
            "JsonFileOperator",
            "YamlFileOperator",
            "TomlFileOperator",
            "SleepOperator",
            "RandomSleepOperator",
            "EnvOperator",
            "DataTransformer",
        ] {
            assert!(
                registry.contains(typename, OPERATOR_VERSION),
                "{} not registered",
                typename
            );
        }
    }

    #[test]
    fn test_load_extension_unknown_name() {
        let mut registry = OperatorRegistry::new();
        assert!(load_extension("sql", &mut registry).is_ok());
        assert!(load_extension("definitely-not-real", &mut registry).is_err());
    }
}
