//! Music-daemon socket executor
//!
//! Speaks the music player daemon's line protocol over TCP or a Unix
//! socket: newline-terminated commands, `key: value` response fields, a
//! final `OK` line on success (`ACK ...` on protocol errors), and an
//! `OK MPD <version>` greeting on connect. Connections are pooled; the
//! liveness probe sends `currentsong` and checks for the trailing `OK`.
//!
//! Supported operations: `add <uri> [pos]`, `playlist`,
//! `playlistsearch <filter>`.

use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::{
    Envelope, CODE_BAD_INPUT, CODE_BAD_PAYLOAD, CODE_TARGET_ERROR,
};
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::pool::{ManagedConnection, Pool, PoolRegistry};
use flowgraph_core::registry::OperatorRegistry;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

static POOLS: PoolRegistry<MpdConn> = PoolRegistry::new();

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

fn default_max_connections() -> usize {
    4
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6600
}

fn default_max_buffer() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize)]
struct MpdConfig {
    #[serde(default)]
    path: Option<String>,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_max_buffer")]
    max_buffer: usize,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

/// Connection parameters for the pool
#[derive(Debug, Clone)]
pub struct MpdConnInfo {
    path: Option<String>,
    host: String,
    port: u16,
    max_buffer: usize,
}

enum MpdStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl MpdStream {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            MpdStream::Tcp(s) => s.write_all(buf).await,
            #[cfg(unix)]
            MpdStream::Unix(s) => s.write_all(buf).await,
        }
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            MpdStream::Tcp(s) => s.read(buf).await,
            #[cfg(unix)]
            MpdStream::Unix(s) => s.read(buf).await,
        }
    }
}

/// Whether a buffered response is complete (final `OK` or `ACK` line seen)
fn response_complete(text: &str) -> bool {
    if !text.ends_with('\n') {
        return false;
    }
    text.lines()
        .last()
        .map(|line| line.starts_with("OK") || line.starts_with("ACK"))
        .unwrap_or(false)
}

/// Whether a complete response reports success
fn response_ok(text: &str) -> bool {
    text.lines()
        .filter(|l| !l.is_empty())
        .last()
        .map(|line| line == "OK" || line.starts_with("OK "))
        .unwrap_or(false)
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+): *(.*)$").unwrap())
}

/// `key: value` response lines, excluding the final status line
fn parse_fields(response: &str) -> Vec<(String, String)> {
    response
        .lines()
        .filter_map(|line| {
            let caps = field_re().captures(line)?;
            Some((caps[1].to_string(), caps[2].to_string()))
        })
        .collect()
}

/// A pooled daemon connection
pub struct MpdConn {
    stream: MpdStream,
    max_buffer: usize,
}

impl MpdConn {
    async fn read_response(&mut self) -> std::io::Result<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.stream.read_chunk(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() >= self.max_buffer {
                break;
            }
            if response_complete(&String::from_utf8_lossy(&buf)) {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn send(&mut self, command: &str) -> std::io::Result<String> {
        self.stream
            .write_all(format!("{}\n", command).as_bytes())
            .await?;
        self.read_response().await
    }
}

#[async_trait]
impl ManagedConnection for MpdConn {
    type Config = MpdConnInfo;

    async fn connect(config: &MpdConnInfo) -> Result<Self> {
        let stream = match &config.path {
            Some(path) => {
                #[cfg(unix)]
                {
                    MpdStream::Unix(
                        UnixStream::connect(path)
                            .await
                            .map_err(|e| FlowError::pool(path, e))?,
                    )
                }
                #[cfg(not(unix))]
                {
                    return Err(FlowError::pool(
                        path,
                        "unix sockets are not available on this platform",
                    ));
                }
            }
            None => MpdStream::Tcp(
                TcpStream::connect((config.host.as_str(), config.port))
                    .await
                    .map_err(|e| FlowError::pool(&config.host, e))?,
            ),
        };

        let mut conn = MpdConn {
            stream,
            max_buffer: config.max_buffer,
        };
        let greeting = conn
            .read_response()
            .await
            .map_err(|e| FlowError::pool(&config.host, e))?;
        if !greeting.starts_with("OK MPD ") {
            return Err(FlowError::pool(&config.host, "unexpected daemon greeting"));
        }
        Ok(conn)
    }

    async fn is_alive(&mut self) -> bool {
        match self.send("currentsong").await {
            Ok(response) => response_ok(&response),
            Err(_) => false,
        }
    }

    async fn close(mut self) {
        let _ = self.stream.write_all(b"close\n").await;
    }
}

/// Music-daemon command executor over pooled connections
pub struct MpdExecutor {
    core: OperatorCore,
    pool: Arc<Pool<MpdConn>>,
}

impl MpdExecutor {
    async fn run_op(
        &self,
        conn: &mut MpdConn,
        op: &str,
        data: &Map<String, Value>,
    ) -> std::io::Result<(bool, Value)> {
        match op {
            "add" => {
                let Some(uri) = data.get("uri").and_then(Value::as_str) else {
                    return Ok((true, json!({})));
                };
                let pos = data
                    .get("pos")
                    .map(|p| match p {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                let response = conn.send(&format!("add \"{}\" {}", uri, pos)).await?;
                Ok((response_ok(&response), Value::String(response)))
            }
            "playlist" => {
                let response = conn.send("playlist").await?;
                let tracks: Vec<Value> = parse_fields(&response)
                    .into_iter()
                    .map(|(_, v)| Value::String(v))
                    .collect();
                Ok((response_ok(&response), Value::Array(tracks)))
            }
            "playlistsearch" => {
                let Some(filter) = data.get("filter").and_then(Value::as_str) else {
                    return Ok((true, json!({})));
                };
                let escaped = filter.replace('"', "\\\"");
                let response = conn
                    .send(&format!("playlistsearch \"{}\"", escaped))
                    .await?;
                let track: Map<String, Value> = parse_fields(&response)
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                Ok((response_ok(&response), Value::Object(track)))
            }
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown operation '{}'", other),
            )),
        }
    }
}

#[async_trait]
impl Operator for MpdExecutor {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let empty = Map::new();
        let payload = data.as_object().unwrap_or(&empty);

        let Some(op) = payload.get("op").and_then(Value::as_str) else {
            return (state, Envelope::ok(json!({ "result": null })));
        };

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "checkout failed");
                return (
                    state,
                    Envelope::failed(json!({ "result": null }), CODE_BAD_INPUT),
                );
            }
        };

        let result = self.run_op(&mut conn, op, payload).await;
        self.pool.release(conn).await;

        let envelope = match result {
            Ok((true, value)) => Envelope::ok(json!({ "result": value })),
            Ok((false, value)) => {
                tracing::error!(node = %self.core.name, op, "daemon reported failure");
                Envelope::failed(json!({ "result": value }), CODE_BAD_PAYLOAD)
            }
            Err(e) => {
                tracing::error!(node = %self.core.name, op, error = %e, "command failed");
                Envelope::failed(json!({ "result": null }), CODE_TARGET_ERROR)
            }
        };
        (state, envelope)
    }
}

/// Register the music-daemon executor
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "MpdExecutor",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: MpdConfig = parse_config(config)?;
            let pool = POOLS.register(
                name,
                MpdConnInfo {
                    path: cfg.path,
                    host: cfg.host,
                    port: cfg.port,
                    max_buffer: cfg.max_buffer,
                },
                cfg.max_connections,
            );
            Ok(Arc::new(MpdExecutor {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                pool,
            }) as Arc<dyn Operator>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_completion() {
        assert!(response_complete("OK\n"));
        assert!(response_complete("file: a.mp3\nOK\n"));
        assert!(response_complete("ACK [50@0] {add} no such song\n"));
        assert!(!response_complete("file: a.mp3\n"));
        assert!(!response_complete("OK"));
    }

    #[test]
    fn test_response_ok() {
        assert!(response_ok("OK\n"));
        assert!(response_ok("OK MPD 0.23.5\n"));
        assert!(!response_ok("ACK [50@0] {add} no such song\n"));
        assert!(!response_ok("file: a.mp3\n"));
    }

    #[test]
    fn test_parse_fields() {
        let response = "file: one.mp3\nTitle: One\nTime: 120\nOK\n";
        let fields = parse_fields(response);
        assert_eq!(
            fields,
            vec![
                ("file".to_string(), "one.mp3".to_string()),
                ("Title".to_string(), "One".to_string()),
                ("Time".to_string(), "120".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_fields_skips_status_lines() {
        assert!(parse_fields("OK\n").is_empty());
        // ACK lines carry brackets and never match the field shape.
        assert!(parse_fields("ACK [50@0] {playlist} error\n").is_empty());
    }

    #[tokio::test]
    async fn test_missing_op_is_a_no_op() {
        let pool = Arc::new(Pool::new(
            "mpd-test",
            MpdConnInfo {
                path: None,
                host: "127.0.0.1".to_string(),
                port: 1,
                max_buffer: 1024,
            },
            1,
        ));
        let op = MpdExecutor {
            core: OperatorCore::new("mpd"),
            pool,
        };

        // No op requested: no connection is made, the result is empty.
        let (_, env) = op.apply(json!({}), json!({})).await;
        assert!(env.is_ok());
        assert!(env.data["result"].is_null());
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_bad_input() {
        let pool = Arc::new(Pool::new(
            "mpd-test-2",
            MpdConnInfo {
                path: None,
                host: "127.0.0.1".to_string(),
                port: 1,
                max_buffer: 1024,
            },
            1,
        ));
        let op = MpdExecutor {
            core: OperatorCore::new("mpd"),
            pool,
        };

        let (_, env) = op.apply(json!({}), json!({"op": "playlist"})).await;
        assert_eq!(env.code, CODE_BAD_INPUT);
    }
}
