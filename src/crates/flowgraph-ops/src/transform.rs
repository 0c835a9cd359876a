//! Data transformer operator
//!
//! The node that lets a pipeline reshape data and update the shared state
//! with logic supplied from outside: an opaque, sandboxed
//! `(state, data) -> (state', data')` function resolved by name from the
//! [`TRANSFORMERS`](flowgraph_core::TRANSFORMERS) directory.
//!
//! Fan-in semantics differ from unpack, so `run` is overridden: the
//! successful entries' data values are merged into one list and the
//! transformer is invoked once. The returned state is deep-merged into the
//! shared state. The returned data is wrapped as `(data, 0)` unless
//! `force` is set, in which case the transformer is trusted to return the
//! envelope itself as a `[data, code]` pair.

use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::{Envelope, Input, Output, CODE_BAD_INPUT, CODE_BAD_PAYLOAD};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use flowgraph_core::state::deep_merge;
use flowgraph_core::transform::{Transformer, TRANSFORMERS};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

#[derive(Debug, Deserialize)]
struct TransformConfig {
    transformer: String,
    #[serde(default)]
    force: bool,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

/// Applies a named transformer to the merged upstream data
pub struct DataTransformer {
    core: OperatorCore,
    transformer: Arc<dyn Transformer>,
    force: bool,
}

impl DataTransformer {
    /// Build a transformer node around an explicit collaborator instance
    pub fn with_transformer(
        name: impl Into<String>,
        transformer: Arc<dyn Transformer>,
        force: bool,
    ) -> Self {
        Self {
            core: OperatorCore::new(name),
            transformer,
            force,
        }
    }

    fn force_envelope(&self, data: Value) -> Envelope {
        // force mode: the transformer returns the envelope itself.
        if let Value::Array(items) = &data {
            if items.len() == 2 {
                if let Some(code) = items[1].as_i64() {
                    return Envelope::failed(items[0].clone(), code);
                }
            }
        }
        tracing::error!(
            node = %self.core.name,
            "forced output is not a [data, code] pair"
        );
        Envelope::failed(Value::Null, CODE_BAD_PAYLOAD)
    }
}

#[async_trait]
impl Operator for DataTransformer {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let (state, out) = self.run(state, Input::Single(Envelope::ok(data))).await;
        (state, out.collapse())
    }

    async fn run(&self, mut state: Value, input: Input) -> (Value, Output) {
        let data = match input {
            Input::Fanin(envs) => {
                let successes: Vec<Value> = envs
                    .into_iter()
                    .filter(Envelope::is_ok)
                    .map(|e| e.data)
                    .collect();
                if successes.is_empty() {
                    return (
                        state,
                        Output::Single(Envelope::failed(Value::Null, CODE_BAD_PAYLOAD)),
                    );
                }
                Value::Array(successes)
            }
            Input::Single(env) => {
                if !env.is_ok() {
                    return (
                        state,
                        Output::Single(Envelope::failed(Value::Null, CODE_BAD_PAYLOAD)),
                    );
                }
                env.data
            }
        };

        match self.transformer.transform(state.clone(), data) {
            Ok((new_state, new_data)) => {
                deep_merge(&mut state, &new_state, true);
                let envelope = if self.force {
                    self.force_envelope(new_data)
                } else {
                    Envelope::ok(new_data)
                };
                (state, Output::Single(envelope))
            }
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "transformer failed");
                (
                    state,
                    Output::Single(Envelope::failed(Value::Null, CODE_BAD_INPUT)),
                )
            }
        }
    }
}

/// Register the data transformer operator
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "DataTransformer",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: TransformConfig = parse_config(config)?;
            let transformer = TRANSFORMERS.get(&cfg.transformer)?;
            Ok(Arc::new(DataTransformer {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                transformer,
                force: cfg.force,
            }) as Arc<dyn Operator>)
        }),
    );
}
