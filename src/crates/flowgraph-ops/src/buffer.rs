//! In-memory codec operators
//!
//! Translate between in-memory values and serialized strings. `read` turns
//! a string payload into a value, `write` a mapping or sequence into a
//! string. Codes: 101 bad input type, 102 read (parse) failure, 103 write
//! failure.

use crate::parse_config;
use async_trait::async_trait;
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
struct BufferConfig {
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

/// Serialized text format of a buffer or file operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// JSON via serde_json
    Json,
    /// YAML via serde_yaml
    Yaml,
    /// TOML via toml
    Toml,
}

impl Codec {
    /// Parse a string into a value
    pub fn decode(&self, raw: &str) -> Result<Value, String> {
        match self {
            Codec::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
            Codec::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
            Codec::Toml => toml::from_str::<toml::Value>(raw)
                .map_err(|e| e.to_string())
                .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        }
    }

    /// Serialize a value into a string
    pub fn encode(&self, value: &Value) -> Result<String, String> {
        match self {
            Codec::Json => serde_json::to_string(value).map_err(|e| e.to_string()),
            Codec::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            Codec::Toml => toml::to_string(value).map_err(|e| e.to_string()),
        }
    }
}

/// String ⇄ value bridge for one codec
pub struct BufferOperator {
    core: OperatorCore,
    codec: Codec,
}

impl BufferOperator {
    fn read(&self, raw: &Value) -> Envelope {
        let Some(text) = raw.as_str() else {
            tracing::error!(node = %self.core.name, "read expects a string payload");
            return Envelope::failed(Value::Null, CODE_BAD_INPUT);
        };
        match self.codec.decode(text) {
            Ok(value) => Envelope::ok(value),
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "cannot decode buffer");
                Envelope::failed(Value::Null, CODE_TARGET_ERROR)
            }
        }
    }

    fn write(&self, raw: &Value) -> Envelope {
        if !raw.is_object() && !raw.is_array() {
            tracing::error!(node = %self.core.name, "write expects a mapping or sequence");
            return Envelope::failed(Value::Null, CODE_BAD_INPUT);
        }
        match self.codec.encode(raw) {
            Ok(text) => Envelope::ok(Value::String(text)),
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "cannot encode buffer");
                Envelope::failed(Value::Null, CODE_BAD_PAYLOAD)
            }
        }
    }
}

#[async_trait]
impl Operator for BufferOperator {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let op = data["op"].as_str().unwrap_or("read");
        let raw = &data["data"];
        let envelope = match op {
            "write" => self.write(raw),
            _ => self.read(raw),
        };
        (state, envelope)
    }
}

fn buffer_factory(codec: Codec) -> flowgraph_core::OperatorFactory {
    Arc::new(move |name, config| {
        let cfg: BufferConfig = parse_config(config)?;
        Ok(Arc::new(BufferOperator {
            core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
            codec,
        }) as Arc<dyn Operator>)
    })
}

/// Register the buffer operators
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "JsonBufferOperator",
        crate::OPERATOR_VERSION,
        buffer_factory(Codec::Json),
    );
    registry.register(
        "YamlBufferOperator",
        crate::OPERATOR_VERSION,
        buffer_factory(Codec::Yaml),
    );
    registry.register(
        "TomlBufferOperator",
        crate::OPERATOR_VERSION,
        buffer_factory(Codec::Toml),
    );
}
