//! Pacing operators
//!
//! Both operators override `run` and forward their input untouched after
//! suspending, so they work identically in single and fan-in positions.

use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::{Envelope, Input, Output};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

fn passthrough(input: Input) -> Output {
    match input {
        Input::Single(env) => Output::Single(env),
        Input::Fanin(envs) => Output::Fanin(envs),
    }
}

#[derive(Debug, Deserialize)]
struct SleepConfig {
    #[serde(default = "default_sleep")]
    sleep: f64,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

fn default_sleep() -> f64 {
    5.0
}

/// Suspends the node for a fixed duration
pub struct SleepOperator {
    core: OperatorCore,
    sleep: Duration,
}

#[async_trait]
impl Operator for SleepOperator {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        (state, Envelope::ok(data))
    }

    async fn run(&self, state: Value, input: Input) -> (Value, Output) {
        tracing::debug!(node = %self.core.name, seconds = self.sleep.as_secs_f64(), "sleeping");
        tokio::time::sleep(self.sleep).await;
        (state, passthrough(input))
    }
}

#[derive(Debug, Deserialize)]
struct RandomSleepConfig {
    #[serde(default = "default_sleep_min")]
    sleep_min: u64,
    #[serde(default = "default_sleep_max")]
    sleep_max: u64,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

fn default_sleep_min() -> u64 {
    5
}

fn default_sleep_max() -> u64 {
    10
}

/// Suspends the node for a random duration inside a configured window
pub struct RandomSleepOperator {
    core: OperatorCore,
    sleep_min: u64,
    sleep_max: u64,
}

#[async_trait]
impl Operator for RandomSleepOperator {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        (state, Envelope::ok(data))
    }

    async fn run(&self, state: Value, input: Input) -> (Value, Output) {
        let secs = rand::thread_rng().gen_range(self.sleep_min..=self.sleep_max.max(self.sleep_min));
        tracing::debug!(node = %self.core.name, seconds = secs, "sleeping");
        tokio::time::sleep(Duration::from_secs(secs)).await;
        (state, passthrough(input))
    }
}

/// Register the sleep operators
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "SleepOperator",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: SleepConfig = parse_config(config)?;
            Ok(Arc::new(SleepOperator {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                sleep: Duration::from_secs_f64(cfg.sleep.max(0.0)),
            }) as Arc<dyn Operator>)
        }),
    );

    registry.register(
        "RandomSleepOperator",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: RandomSleepConfig = parse_config(config)?;
            Ok(Arc::new(RandomSleepOperator {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                sleep_min: cfg.sleep_min,
                sleep_max: cfg.sleep_max,
            }) as Arc<dyn Operator>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sleep_passes_input_through() {
        let op = SleepOperator {
            core: OperatorCore::new("s"),
            sleep: Duration::from_secs(0),
        };

        let (_, out) = op
            .run(json!({}), Input::Single(Envelope::ok(json!("x"))))
            .await;
        assert_eq!(out, Output::Single(Envelope::ok(json!("x"))));

        let fanin = Input::Fanin(vec![
            Envelope::ok(json!(1)),
            Envelope::failed(Value::Null, 101),
        ]);
        let (_, out) = op.run(json!({}), fanin).await;
        // Errored entries survive the pass-through untouched.
        match out {
            Output::Fanin(envs) => {
                assert_eq!(envs.len(), 2);
                assert_eq!(envs[1].code, 101);
            }
            other => panic!("expected fan-in, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_random_sleep_zero_window() {
        let op = RandomSleepOperator {
            core: OperatorCore::new("r"),
            sleep_min: 0,
            sleep_max: 0,
        };
        let (_, out) = op
            .run(json!({}), Input::Single(Envelope::ok(json!(1))))
            .await;
        assert_eq!(out, Output::Single(Envelope::ok(json!(1))));
    }

    #[test]
    fn test_config_defaults() {
        let cfg: SleepConfig = parse_config(&Value::Null).unwrap();
        assert_eq!(cfg.sleep, 5.0);
        assert_eq!(cfg.max_tasks, 4);
    }
}
