//! Operator contract and the uniform unpack adapter
//!
//! Every node in a pipeline is an [`Operator`]. The contract has two
//! operations:
//!
//! - [`Operator::apply`] — the unit of work for a single input payload
//!   (`do` in the configuration vocabulary),
//! - [`Operator::run`] — the uniform entry point the scheduler calls,
//!   whose default implementation is the [`unpack`] adapter.
//!
//! # Unpack
//!
//! Unpack makes any operator indifferent to its position in the graph:
//!
//! - a `Single` input with code `0` is handed straight to `apply`; an
//!   errored envelope is forwarded unchanged,
//! - a `Fanin` input is filtered to its successful entries, each of which is
//!   run through `apply` as a sub-task with at most
//!   [`Operator::max_tasks`] concurrently in flight; the resulting
//!   envelopes are collected in the original predecessor order.
//!
//! Sub-tasks receive a clone of the entry state; the states they return are
//! folded back into the entry state with [`deep_merge`] in predecessor
//! order, preserving the left-to-right bias a sequential execution would
//! have.
//!
//! Operators that need different fan-in semantics (sleep pass-through, the
//! data transformer's merge-then-transform) override `run` directly.

use crate::envelope::{Envelope, Input, Output};
use crate::state::deep_merge;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

/// Default bound on concurrent unpack sub-tasks
pub const DEFAULT_MAX_TASKS: usize = 4;

fn default_max_tasks() -> usize {
    DEFAULT_MAX_TASKS
}

/// Identity and tuning every operator instance carries
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OperatorCore {
    /// Node name (unique within a pipeline; also the connection-pool key
    /// for pooled operators)
    #[serde(skip)]
    pub name: String,

    /// Bound on concurrent unpack sub-tasks
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
}

impl OperatorCore {
    /// Create a core with the default `max_tasks`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }

    /// Create a core with an explicit `max_tasks`
    pub fn with_max_tasks(name: impl Into<String>, max_tasks: usize) -> Self {
        Self {
            name: name.into(),
            max_tasks,
        }
    }
}

/// A reusable, named unit of work executed as a pipeline node
#[async_trait]
pub trait Operator: Send + Sync {
    /// Node name this instance was configured with
    fn name(&self) -> &str;

    /// Bound on concurrent unpack sub-tasks
    fn max_tasks(&self) -> usize {
        DEFAULT_MAX_TASKS
    }

    /// Unit of work for a single input payload.
    ///
    /// Receives a snapshot of the shared state and the upstream data value;
    /// returns the (possibly updated) state and a result envelope. Faults
    /// are reported as coded envelopes, not errors.
    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope);

    /// Uniform entry point used by the scheduler.
    ///
    /// Defaults to the [`unpack`] adapter.
    async fn run(&self, state: Value, input: Input) -> (Value, Output) {
        unpack(self, state, input).await
    }
}

/// The uniform adapter between single- and list-shaped inputs.
///
/// Public so operators overriding [`Operator::run`] can still delegate the
/// standard path.
pub async fn unpack<O>(op: &O, state: Value, input: Input) -> (Value, Output)
where
    O: Operator + ?Sized,
{
    match input {
        Input::Single(env) => {
            if env.is_ok() {
                let (state, out) = op.apply(state, env.data).await;
                (state, Output::Single(out))
            } else {
                // Errored upstream envelopes are forwarded untouched.
                (state, Output::Single(env))
            }
        }
        Input::Fanin(envs) => {
            let bound = op.max_tasks().max(1);
            let results: Vec<(Value, Envelope)> = stream::iter(
                envs.into_iter()
                    .filter(Envelope::is_ok)
                    .map(|env| op.apply(state.clone(), env.data)),
            )
            .buffered(bound)
            .collect()
            .await;

            let mut merged = state;
            let mut out = Vec::with_capacity(results.len());
            for (sub_state, env) in results {
                deep_merge(&mut merged, &sub_state, true);
                out.push(env);
            }
            (merged, Output::Fanin(out))
        }
    }
}
