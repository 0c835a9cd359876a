//! SQLite executor
//!
//! Runs a configured statement against a pooled SQLite database. This is
//! the one executor that also supports textual `{placeholder}`
//! substitution into the statement template from the per-call
//! `placeholder` map.

use super::{rewrite_named, substitute_placeholders, BindStyle};
use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::{Envelope, CODE_BAD_INPUT, CODE_TARGET_ERROR};
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::pool::{ManagedConnection, Pool, PoolRegistry};
use flowgraph_core::registry::OperatorRegistry;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection, TypeInfo, ValueRef};
use std::sync::Arc;

static POOLS: PoolRegistry<SqliteConn> = PoolRegistry::new();

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

fn default_max_connections() -> usize {
    4
}

#[derive(Debug, Deserialize)]
struct SqliteConfig {
    path: String,
    statement: String,
    #[serde(default)]
    param: Map<String, Value>,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

/// Connection parameters for the pool
#[derive(Debug, Clone)]
pub struct SqliteConnInfo {
    path: String,
    pragmas: Vec<(String, String)>,
}

/// A pooled SQLite connection
pub struct SqliteConn(SqliteConnection);

#[async_trait]
impl ManagedConnection for SqliteConn {
    type Config = SqliteConnInfo;

    async fn connect(config: &SqliteConnInfo) -> Result<Self> {
        let options = if config.path == ":memory:" {
            std::str::FromStr::from_str(":memory:")
                .map_err(|e: sqlx::Error| FlowError::pool(&config.path, e))?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
        };

        let mut conn = options
            .connect()
            .await
            .map_err(|e| FlowError::pool(&config.path, e))?;

        for (key, value) in &config.pragmas {
            if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(FlowError::configuration(format!(
                    "bad pragma name '{}'",
                    key
                )));
            }
            sqlx::query(&format!("PRAGMA {} = {}", key, value))
                .execute(&mut conn)
                .await
                .map_err(|e| FlowError::pool(&config.path, e))?;
        }

        Ok(SqliteConn(conn))
    }

    async fn is_alive(&mut self) -> bool {
        self.0.ping().await.is_ok()
    }

    async fn close(self) {
        let _ = self.0.close().await;
    }
}

fn decode_column(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();
    match type_name.as_str() {
        "INTEGER" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn row_to_value(row: &SqliteRow) -> Value {
    Value::Array(
        (0..row.columns().len())
            .map(|i| decode_column(row, i))
            .collect(),
    )
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
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
        other => query.bind(other.to_string()),
    }
}

/// Pooled SQLite statement executor
pub struct SqliteExecutor {
    core: OperatorCore,
    statement: String,
    pool: Arc<Pool<SqliteConn>>,
}

impl SqliteExecutor {
    async fn execute(
        conn: &mut SqliteConn,
        statement: &str,
        value: &Value,
    ) -> std::result::Result<Vec<Value>, String> {
        let mut tx = conn.0.begin().await.map_err(|e| e.to_string())?;

        let rows = match value {
            Value::Object(params) => {
                let (stm, binds) = rewrite_named(statement, params, BindStyle::Question)?;
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
impl Operator for SqliteExecutor {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let empty = Map::new();
        let payload = data.as_object().unwrap_or(&empty);
        let statement = substitute_placeholders(
            &self.statement,
            payload.get("placeholder").and_then(Value::as_object),
        );
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

        let result = Self::execute(&mut conn, &statement, &value).await;
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

/// Register the SQLite executor
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "SqLiteExecutor",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: SqliteConfig = parse_config(config)?;
            let pragmas = cfg
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

            let pool = POOLS.register(
                name,
                SqliteConnInfo {
                    path: cfg.path,
                    pragmas,
                },
                cfg.max_connections,
            );

            Ok(Arc::new(SqliteExecutor {
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

    fn memory_pool(name: &str) -> Arc<Pool<SqliteConn>> {
        // A dedicated single-connection pool keeps every statement on the
        // same in-memory database.
        Arc::new(Pool::new(
            name,
            SqliteConnInfo {
                path: ":memory:".to_string(),
                pragmas: vec![],
            },
            1,
        ))
    }

    fn executor(name: &str, statement: &str, pool: Arc<Pool<SqliteConn>>) -> SqliteExecutor {
        SqliteExecutor {
            core: OperatorCore::new(name),
            statement: statement.to_string(),
            pool,
        }
    }

    #[tokio::test]
    async fn test_executemany_then_select() {
        let pool = memory_pool("mem1");

        let create = executor("c", "CREATE TABLE t (x INTEGER)", pool.clone());
        let (_, env) = create.apply(json!({}), json!({})).await;
        assert!(env.is_ok(), "{:?}", env);

        let insert = executor("i", "INSERT INTO t(x) VALUES(?)", pool.clone());
        let (_, env) = insert
            .apply(json!({}), json!({"value": [[1], [2], [3]]}))
            .await;
        assert!(env.is_ok(), "{:?}", env);
        assert_eq!(env.data["resultset"], json!([]));

        let select = executor("s", "SELECT x FROM t ORDER BY x", pool.clone());
        let (_, env) = select.apply(json!({}), json!({})).await;
        assert!(env.is_ok(), "{:?}", env);
        assert_eq!(env.data["resultset"], json!([[1], [2], [3]]));
    }

    #[tokio::test]
    async fn test_named_parameters() {
        let pool = memory_pool("mem2");

        let create = executor("c", "CREATE TABLE kv (k TEXT, v REAL)", pool.clone());
        create.apply(json!({}), json!({})).await;

        let insert = executor("i", "INSERT INTO kv VALUES(:k, :v)", pool.clone());
        let (_, env) = insert
            .apply(json!({}), json!({"value": {"k": "pi", "v": 3.5}}))
            .await;
        assert!(env.is_ok(), "{:?}", env);

        let select = executor("s", "SELECT k, v FROM kv", pool.clone());
        let (_, env) = select.apply(json!({}), json!({})).await;
        assert_eq!(env.data["resultset"], json!([["pi", 3.5]]));
    }

    #[tokio::test]
    async fn test_placeholder_substitution() {
        let pool = memory_pool("mem3");

        let create = executor("c", "CREATE TABLE events (n INTEGER)", pool.clone());
        create.apply(json!({}), json!({})).await;
        let insert = executor("i", "INSERT INTO events VALUES(?)", pool.clone());
        insert.apply(json!({}), json!({"value": [7]})).await;

        let select = executor("s", "SELECT n FROM {table}", pool.clone());
        let (_, env) = select
            .apply(json!({}), json!({"placeholder": {"table": "events"}}))
            .await;
        assert_eq!(env.data["resultset"], json!([[7]]));
    }

    #[tokio::test]
    async fn test_database_error_rolls_back() {
        let pool = memory_pool("mem4");

        let create = executor("c", "CREATE TABLE only (x INTEGER)", pool.clone());
        create.apply(json!({}), json!({})).await;

        let broken = executor("b", "INSERT INTO missing VALUES(1)", pool.clone());
        let (_, env) = broken.apply(json!({}), json!({})).await;
        assert_eq!(env.code, CODE_TARGET_ERROR);
        assert_eq!(env.data["resultset"], json!([]));

        // The connection survives the failed statement.
        let select = executor("s", "SELECT COUNT(*) FROM only", pool.clone());
        let (_, env) = select.apply(json!({}), json!({})).await;
        assert!(env.is_ok());
        assert_eq!(env.data["resultset"], json!([[0]]));
    }
}
