//! Environment variable reads

use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::Envelope;
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

#[derive(Debug, Deserialize)]
struct EnvConfig {
    #[serde(default)]
    vars: Vec<String>,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

/// Reads configured environment variables into a mapping
///
/// Unset variables appear with a null value.
pub struct EnvOperator {
    core: OperatorCore,
    vars: Vec<String>,
}

#[async_trait]
impl Operator for EnvOperator {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, _data: Value) -> (Value, Envelope) {
        let mut out = Map::new();
        for var in &self.vars {
            let value = std::env::var(var)
                .map(Value::String)
                .unwrap_or(Value::Null);
            out.insert(var.clone(), value);
        }
        (state, Envelope::ok(Value::Object(out)))
    }
}

/// Register the env operator
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "EnvOperator",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: EnvConfig = parse_config(config)?;
            Ok(Arc::new(EnvOperator {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                vars: cfg.vars,
            }) as Arc<dyn Operator>)
        }),
    );
}
