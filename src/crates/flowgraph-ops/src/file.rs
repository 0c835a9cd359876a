//! File codec operators
//!
//! The typed variants read and write JSON/YAML/TOML files through the same
//! [`Codec`](crate::buffer::Codec) bridge the buffer operators use. The
//! `Any` variant moves raw text, or raw bytes in binary mode (bytes travel
//! through envelopes base64-encoded).
//!
//! Codes: 101 bad input type, 102 read failure, 103 write failure.

use crate::buffer::Codec;
use crate::parse_config;
use async_trait::async_trait;
use base64::Engine;
use flowgraph_core::envelope::{
    Envelope, CODE_BAD_INPUT, CODE_BAD_PAYLOAD, CODE_TARGET_ERROR,
};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

#[derive(Debug, Deserialize)]
struct AnyFileConfig {
    #[serde(default)]
    binary: bool,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

/// Typed file bridge for one codec
pub struct FileOperator {
    core: OperatorCore,
    codec: Codec,
}

impl FileOperator {
    async fn read(&self, path: &str) -> Envelope {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(node = %self.core.name, path, error = %e, "cannot read file");
                return Envelope::failed(Value::Null, CODE_TARGET_ERROR);
            }
        };
        match self.codec.decode(&contents) {
            Ok(value) => Envelope::ok(value),
            Err(e) => {
                tracing::error!(node = %self.core.name, path, error = %e, "cannot decode file");
                Envelope::failed(Value::Null, CODE_TARGET_ERROR)
            }
        }
    }

    async fn write(&self, path: &str, raw: &Value) -> Envelope {
        if !raw.is_object() && !raw.is_array() {
            tracing::error!(node = %self.core.name, "write expects a mapping or sequence");
            return Envelope::failed(raw.clone(), CODE_BAD_INPUT);
        }
        let text = match self.codec.encode(raw) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(node = %self.core.name, path, error = %e, "cannot encode value");
                return Envelope::failed(raw.clone(), CODE_BAD_PAYLOAD);
            }
        };
        match tokio::fs::write(path, text).await {
            Ok(()) => Envelope::ok(raw.clone()),
            Err(e) => {
                tracing::error!(node = %self.core.name, path, error = %e, "cannot write file");
                Envelope::failed(raw.clone(), CODE_BAD_PAYLOAD)
            }
        }
    }
}

#[async_trait]
impl Operator for FileOperator {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let op = data["op"].as_str().unwrap_or("read");
        let Some(path) = data["path"].as_str() else {
            tracing::error!(node = %self.core.name, "missing 'path'");
            return (state, Envelope::failed(Value::Null, CODE_BAD_INPUT));
        };
        let envelope = match op {
            "write" => self.write(path, &data["data"]).await,
            _ => self.read(path).await,
        };
        (state, envelope)
    }
}

/// Raw text/bytes file bridge
pub struct AnyFileOperator {
    core: OperatorCore,
    binary: bool,
}

impl AnyFileOperator {
    async fn read(&self, path: &str) -> Envelope {
        if self.binary {
            match tokio::fs::read(path).await {
                Ok(bytes) => Envelope::ok(Value::String(
                    base64::engine::general_purpose::STANDARD.encode(bytes),
                )),
                Err(e) => {
                    tracing::error!(node = %self.core.name, path, error = %e, "cannot read file");
                    Envelope::failed(Value::Null, CODE_TARGET_ERROR)
                }
            }
        } else {
            match tokio::fs::read_to_string(path).await {
                Ok(text) => Envelope::ok(Value::String(text)),
                Err(e) => {
                    tracing::error!(node = %self.core.name, path, error = %e, "cannot read file");
                    Envelope::failed(Value::Null, CODE_TARGET_ERROR)
                }
            }
        }
    }

    async fn write(&self, path: &str, raw: &Value) -> Envelope {
        let Some(text) = raw.as_str() else {
            tracing::error!(node = %self.core.name, "write expects a string payload");
            return Envelope::failed(raw.clone(), CODE_BAD_INPUT);
        };
        let bytes = if self.binary {
            base64::engine::general_purpose::STANDARD
                .decode(text)
                .unwrap_or_else(|_| text.as_bytes().to_vec())
        } else {
            text.as_bytes().to_vec()
        };
        match tokio::fs::write(path, bytes).await {
            Ok(()) => Envelope::ok(raw.clone()),
            Err(e) => {
                tracing::error!(node = %self.core.name, path, error = %e, "cannot write file");
                Envelope::failed(raw.clone(), CODE_BAD_PAYLOAD)
            }
        }
    }
}

#[async_trait]
impl Operator for AnyFileOperator {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let op = data["op"].as_str().unwrap_or("read");
        let Some(path) = data["path"].as_str() else {
            tracing::error!(node = %self.core.name, "missing 'path'");
            return (state, Envelope::failed(Value::Null, CODE_BAD_INPUT));
        };
        let envelope = match op {
            "write" => self.write(path, &data["data"]).await,
            _ => self.read(path).await,
        };
        (state, envelope)
    }
}

fn file_factory(codec: Codec) -> flowgraph_core::OperatorFactory {
    Arc::new(move |name, config| {
        let cfg: FileConfig = parse_config(config)?;
        Ok(Arc::new(FileOperator {
            core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
            codec,
        }) as Arc<dyn Operator>)
    })
}

/// Register the file operators
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "AnyFileOperator",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: AnyFileConfig = parse_config(config)?;
            Ok(Arc::new(AnyFileOperator {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                binary: cfg.binary,
            }) as Arc<dyn Operator>)
        }),
    );
    registry.register(
        "JsonFileOperator",
        crate::OPERATOR_VERSION,
        file_factory(Codec::Json),
    );
    registry.register(
        "YamlFileOperator",
        crate::OPERATOR_VERSION,
        file_factory(Codec::Yaml),
    );
    registry.register(
        "TomlFileOperator",
        crate::OPERATOR_VERSION,
        file_factory(Codec::Toml),
    );
}
