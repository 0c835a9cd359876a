//! PostgreSQL executor
//!
//! Assembles connection URLs from DSN components (username, password,
//! host list, database, parameters), optionally decrypting the configured
//! password with a symmetric key file, and runs the configured statement
//! over pooled connections. Hosts are tried in order until one accepts
//! the connection.

use super::{rewrite_named, BindStyle};
use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::{Envelope, CODE_BAD_INPUT, CODE_TARGET_ERROR};
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::pool::{ManagedConnection, Pool, PoolRegistry};
use flowgraph_core::registry::OperatorRegistry;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection, Row, TypeInfo, ValueRef};
use std::sync::Arc;

static POOLS: PoolRegistry<PgConn> = PoolRegistry::new();

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

fn default_max_connections() -> usize {
    4
}

#[derive(Debug, Deserialize)]
struct PgConfig {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    /// Key file used to decrypt `password` when set
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    host: Vec<String>,
    #[serde(default)]
    dbname: Option<String>,
    #[serde(default)]
    param: Map<String, Value>,
    statement: String,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

/// Connection URLs for the pool, one per configured host
#[derive(Debug, Clone)]
pub struct PgConnInfo {
    urls: Vec<String>,
}

/// A pooled PostgreSQL connection
pub struct PgConn(PgConnection);

#[async_trait]
impl ManagedConnection for PgConn {
    type Config = PgConnInfo;

    async fn connect(config: &PgConnInfo) -> Result<Self> {
        let mut last_error = None;
        for url in &config.urls {
            match PgConnection::connect(url).await {
                Ok(conn) => return Ok(PgConn(conn)),
                Err(e) => last_error = Some(e),
            }
        }
        Err(FlowError::pool(
            "pgsql",
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no hosts configured".to_string()),
        ))
    }

    async fn is_alive(&mut self) -> bool {
        self.0.ping().await.is_ok()
    }

    async fn close(self) {
        let _ = self.0.close().await;
    }
}

fn build_urls(cfg: &PgConfig, password: Option<&str>) -> Vec<String> {
    let userspec = match (&cfg.username, password) {
        (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
        (Some(user), None) => format!("{}@", user),
        _ => String::new(),
    };
    let dbspec = cfg
        .dbname
        .as_deref()
        .map(|db| format!("/{}", db))
        .unwrap_or_default();

    let mut params: Vec<(String, String)> = cfg
        .param
        .iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect();
    if !params.iter().any(|(k, _)| k == "connect_timeout") {
        params.push(("connect_timeout".to_string(), "30".to_string()));
    }
    let paramspec = format!(
        "?{}",
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    );

    cfg.host
        .iter()
        .map(|host| format!("postgresql://{}{}{}{}", userspec, host, dbspec, paramspec))
        .collect()
}

fn decode_column(row: &PgRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();
    match type_name.as_str() {
        "INT2" => row
            .try_get::<i16, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT4" => row
            .try_get::<i32, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT8" => row
            .try_get::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOL" => row
            .try_get::<bool, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Value, _>(index)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn row_to_value(row: &PgRow) -> Value {
    Value::Array(
        (0..row.columns().len())
            .map(|i| decode_column(row, i))
            .collect(),
    )
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.clone()),
    }
}

/// Pooled PostgreSQL statement executor
pub struct PgSqlExecutor {
    core: OperatorCore,
    statement: String,
    pool: Arc<Pool<PgConn>>,
}

impl PgSqlExecutor {
    async fn execute(
        conn: &mut PgConn,
        statement: &str,
        value: &Value,
    ) -> std::result::Result<Vec<Value>, String> {
        let mut tx = conn.0.begin().await.map_err(|e| e.to_string())?;

        let rows = match value {
            Value::Object(params) => {
                let (stm, binds) = rewrite_named(statement, params, BindStyle::Dollar)?;
                let mut query = sqlx::query(&stm);
                for bind in &binds {
                    query = bind_value(query, bind);
                }
                let rows = query
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(|e| e.to_string())?;
                rows.iter().map(row_to_value).collect()
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_array) => {
                for item in items {
                    let mut query = sqlx::query(statement);
                    for bind in item.as_array().into_iter().flatten() {
                        query = bind_value(query, bind);
                    }
                    query.execute(&mut *tx).await.map_err(|e| e.to_string())?;
                }
                Vec::new()
            }
            Value::Array(items) => {
                let mut query = sqlx::query(statement);
                for bind in items {
                    query = bind_value(query, bind);
                }
                let rows = query
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(|e| e.to_string())?;
                rows.iter().map(row_to_value).collect()
            }
            Value::Null => {
                let rows = sqlx::query(statement)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(|e| e.to_string())?;
                rows.iter().map(row_to_value).collect()
            }
            other => return Err(format!("unsupported value shape: {}", other)),
        };

        tx.commit().await.map_err(|e| e.to_string())?;
        Ok(rows)
    }
}

#[async_trait]
impl Operator for PgSqlExecutor {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let empty = Map::new();
        let payload = data.as_object().unwrap_or(&empty);
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "checkout failed");
                return (
                    state,
                    Envelope::failed(json!({"resultset": []}), CODE_BAD_INPUT),
                );
            }
        };

        let result = Self::execute(&mut conn, &self.statement, &value).await;
        self.pool.release(conn).await;

        let envelope = match result {
            Ok(rows) => Envelope::ok(json!({ "resultset": rows })),
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "statement failed");
                Envelope::failed(json!({"resultset": []}), CODE_TARGET_ERROR)
            }
        };
        (state, envelope)
    }
}

/// Register the PostgreSQL executor
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "PgSqlExecutor",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: PgConfig = parse_config(config)?;

            let password = match (&cfg.password, &cfg.secret) {
                (Some(encrypted), Some(secret)) => {
                    let key = crate::crypto::load_key_sync(secret)
                        .map_err(FlowError::configuration)?;
                    Some(
                        crate::crypto::decrypt(&key, encrypted)
                            .map_err(FlowError::configuration)?,
                    )
                }
                (password, _) => password.clone(),
            };

            let urls = build_urls(&cfg, password.as_deref());
            if urls.is_empty() {
                return Err(FlowError::configuration(
                    "at least one host is required",
                ));
            }

            let pool = POOLS.register(name, PgConnInfo { urls }, cfg.max_connections);

            Ok(Arc::new(PgSqlExecutor {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                statement: cfg.statement,
                pool,
            }) as Arc<dyn Operator>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: Value) -> PgConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_build_urls_full_spec() {
        let cfg = config(json!({
            "username": "app",
            "host": ["db1:5432", "db2:5432"],
            "dbname": "events",
            "statement": "SELECT 1",
            "param": {"sslmode": "require"},
        }));
        let urls = build_urls(&cfg, Some("pw"));
        assert_eq!(urls.len(), 2);
        assert_eq!(
            urls[0],
            "postgresql://app:pw@db1:5432/events?sslmode=require&connect_timeout=30"
        );
        assert!(urls[1].starts_with("postgresql://app:pw@db2:5432/events?"));
    }

    #[test]
    fn test_build_urls_defaults_connect_timeout() {
        let cfg = config(json!({
            "host": ["localhost"],
            "statement": "SELECT 1",
        }));
        let urls = build_urls(&cfg, None);
        assert_eq!(urls[0], "postgresql://localhost?connect_timeout=30");
    }

    #[test]
    fn test_build_urls_respects_explicit_timeout() {
        let cfg = config(json!({
            "host": ["localhost"],
            "statement": "SELECT 1",
            "param": {"connect_timeout": 5},
        }));
        let urls = build_urls(&cfg, None);
        assert_eq!(urls[0], "postgresql://localhost?connect_timeout=5");
    }
}
