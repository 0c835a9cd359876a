//! Pipeline scheduler
//!
//! A [`Pipeline`] owns an instantiated DAG of operators plus the machinery
//! to run it. Execution is in-degree driven:
//!
//! 1. every node whose `remaining` count reaches zero is dispatched as a
//!    task with its input built from predecessor outputs (dispatch sets a
//!    `-1` sentinel so a node can never be dispatched twice),
//! 2. the scheduler waits for any task to complete, folds the returned
//!    state in, records the output, and decrements successors,
//! 3. when every node is done, the terminal node's output is returned as a
//!    deep copy and the per-run state is dropped.
//!
//! There is no concurrency bound across nodes: everything that is ready
//! runs. Per-node parallelism is bounded inside the operator by unpack.
//!
//! A node whose task fails (operator panic) does not abort the run; the
//! scheduler logs it and records `(null, 101)` so successors see a
//! deterministic errored envelope.
//!
//! One `run` at a time per pipeline instance; concurrent callers queue on
//! the pipeline lock.

use crate::config::PipelineConfig;
use crate::envelope::{Envelope, Input, Output, CODE_BAD_INPUT};
use crate::error::{FlowError, Result};
use crate::graph::Dag;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use crate::state::empty_state;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// An instantiated, runnable DAG of operators
pub struct Pipeline {
    name: String,
    nodes: Vec<Arc<dyn Operator>>,
    dag: Dag,
    last: Option<usize>,
    run_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("node_count", &self.nodes.len())
            .field("dag", &self.dag)
            .field("last", &self.last)
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline from already-constructed operators.
    ///
    /// `nodes` pairs each node name with its operator instance; `digraph`
    /// holds `"A -> B"` edge strings; `last` optionally names the terminal
    /// node.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<(String, Arc<dyn Operator>)>,
        digraph: &[String],
        last: Option<&str>,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(FlowError::validation("pipeline has no nodes"));
        }

        let names: Vec<String> = nodes.iter().map(|(n, _)| n.clone()).collect();
        let dag = Dag::new(&names, digraph)?;

        let last = match last {
            Some(name) => Some(dag.index_of(name).ok_or_else(|| {
                FlowError::validation(format!("terminal node '{}' does not exist", name))
            })?),
            None => None,
        };

        Ok(Self {
            name: name.into(),
            nodes: nodes.into_iter().map(|(_, op)| op).collect(),
            dag,
            last,
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Build a pipeline from configuration, resolving operator factories
    /// against the registry.
    pub fn from_config(config: &PipelineConfig, registry: &OperatorRegistry) -> Result<Self> {
        config.validate()?;

        let mut nodes = Vec::with_capacity(config.node.len());
        for node in &config.node {
            let op = registry.build(&node.typename, &node.version, &node.name, &node.config)?;
            nodes.push((node.name.clone(), op));
        }

        Self::new(
            config.name.clone(),
            nodes,
            &config.digraph,
            config.last.as_deref(),
        )
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the pipeline once and return the terminal node's envelope.
    ///
    /// `initial` is handed to every root node as `(initial, 0)`. The
    /// returned envelope is a deep copy: the caller cannot alias any state
    /// internal to the run.
    pub async fn run(&self, initial: Value) -> Envelope {
        let _guard = self.run_lock.lock().await;

        let n = self.dag.len();
        let mut remaining: Vec<i64> = self.dag.in_degrees().iter().map(|&d| d as i64).collect();
        let mut out: Vec<Option<Output>> = vec![None; n];
        let mut state = empty_state();
        let mut pending = n;

        let mut tasks: JoinSet<(usize, (Value, Output))> = JoinSet::new();
        let mut task_nodes: HashMap<tokio::task::Id, usize> = HashMap::new();

        while pending > 0 {
            for v in 0..n {
                if remaining[v] == 0 {
                    let input = self.build_input(v, &out, &initial);
                    let op = Arc::clone(&self.nodes[v]);
                    let snapshot = state.clone();

                    tracing::debug!(
                        pipeline = %self.name,
                        node = %self.dag.name(v),
                        "dispatching node"
                    );

                    let handle = tasks.spawn(async move {
                        let result = op.run(snapshot, input).await;
                        (v, result)
                    });
                    task_nodes.insert(handle.id(), v);
                    remaining[v] = -1;
                }
            }

            let done = match tasks.join_next_with_id().await {
                Some(Ok((id, (v, (new_state, output))))) => {
                    task_nodes.remove(&id);
                    state = new_state;
                    tracing::debug!(
                        pipeline = %self.name,
                        node = %self.dag.name(v),
                        "node completed"
                    );
                    out[v] = Some(output);
                    v
                }
                Some(Err(join_err)) => {
                    let Some(v) = task_nodes.remove(&join_err.id()) else {
                        continue;
                    };
                    tracing::error!(
                        pipeline = %self.name,
                        node = %self.dag.name(v),
                        error = %join_err,
                        "node task failed"
                    );
                    out[v] = Some(Output::Single(Envelope::failed(
                        Value::Null,
                        CODE_BAD_INPUT,
                    )));
                    v
                }
                // No tasks left but nodes pending: unreachable on a DAG.
                None => break,
            };

            pending -= 1;
            for &w in self.dag.succs(done) {
                remaining[w] -= 1;
            }
        }

        let last = self
            .last
            .unwrap_or_else(|| self.dag.topo_order().last().copied().unwrap_or(0));

        out[last]
            .take()
            .map(Output::collapse)
            .unwrap_or_else(|| Envelope::failed(Value::Null, CODE_BAD_INPUT))
    }

    /// Build a node's input from its predecessors' recorded outputs.
    ///
    /// No predecessors: `(initial, 0)`. One predecessor: its output with
    /// shape preserved (a fan-in output flows through as a fan-in input).
    /// Several predecessors: the ordered list of their collapsed envelopes.
    fn build_input(&self, v: usize, out: &[Option<Output>], initial: &Value) -> Input {
        let preds = self.dag.preds(v);
        match preds.len() {
            0 => Input::Single(Envelope::ok(initial.clone())),
            1 => out[preds[0]]
                .clone()
                .map(Input::from)
                .unwrap_or_else(|| Input::Single(Envelope::failed(Value::Null, CODE_BAD_INPUT))),
            _ => Input::Fanin(
                preds
                    .iter()
                    .map(|&u| {
                        out[u]
                            .clone()
                            .map(Output::collapse)
                            .unwrap_or_else(|| Envelope::failed(Value::Null, CODE_BAD_INPUT))
                    })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::CODE_OK;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Emits a constant value, counting invocations
    struct Emit {
        name: String,
        value: Value,
        calls: AtomicUsize,
    }

    impl Emit {
        fn node(name: &str, value: Value) -> (String, Arc<Emit>) {
            (
                name.to_string(),
                Arc::new(Emit {
                    name: name.to_string(),
                    value,
                    calls: AtomicUsize::new(0),
                }),
            )
        }
    }

    #[async_trait]
    impl Operator for Emit {
        fn name(&self) -> &str {
            &self.name
        }

        async fn apply(&self, state: Value, _data: Value) -> (Value, Envelope) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (state, Envelope::ok(self.value.clone()))
        }
    }

    /// Passes the payload through unchanged
    struct Pass {
        name: String,
    }

    impl Pass {
        fn node(name: &str) -> (String, Arc<dyn Operator>) {
            (
                name.to_string(),
                Arc::new(Pass {
                    name: name.to_string(),
                }),
            )
        }
    }

    #[async_trait]
    impl Operator for Pass {
        fn name(&self) -> &str {
            &self.name
        }

        async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
            (state, Envelope::ok(data))
        }
    }

    /// Records the raw input shape it was dispatched with
    struct Capture {
        name: String,
        seen: Mutex<Option<Input>>,
    }

    impl Capture {
        fn new(name: &str) -> Arc<Capture> {
            Arc::new(Capture {
                name: name.to_string(),
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Operator for Capture {
        fn name(&self) -> &str {
            &self.name
        }

        async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
            (state, Envelope::ok(data))
        }

        async fn run(&self, state: Value, input: Input) -> (Value, Output) {
            *self.seen.lock().unwrap() = Some(input.clone());
            crate::operator::unpack(self, state, input).await
        }
    }

    struct Panics {
        name: String,
    }

    #[async_trait]
    impl Operator for Panics {
        fn name(&self) -> &str {
            &self.name
        }

        async fn apply(&self, _state: Value, _data: Value) -> (Value, Envelope) {
            panic!("node blew up");
        }
    }

    fn edges(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_linear_chain() {
        let (a_name, a) = Emit::node("A", json!({"X": "hello"}));
        let pipeline = Pipeline::new(
            "test",
            vec![(a_name, a.clone()), Pass::node("B")],
            &edges(&["A -> B"]),
            None,
        )
        .unwrap();

        let out = pipeline.run(json!({})).await;
        assert_eq!(out.code, CODE_OK);
        assert_eq!(out.data, json!({"X": "hello"}));
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_root_receives_initial_data() {
        let capture = Capture::new("A");
        let pipeline = Pipeline::new(
            "test",
            vec![("A".to_string(), capture.clone() as Arc<dyn Operator>)],
            &[],
            None,
        )
        .unwrap();

        let out = pipeline.run(json!({"seed": 1})).await;
        assert_eq!(out.data, json!({"seed": 1}));

        let seen = capture.seen.lock().unwrap().clone().unwrap();
        match seen {
            Input::Single(env) => {
                assert_eq!(env.data, json!({"seed": 1}));
                assert_eq!(env.code, CODE_OK);
            }
            other => panic!("root should see a single envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_predecessor_gets_envelope_not_list() {
        let capture = Capture::new("B");
        let (a_name, a) = Emit::node("A", json!(7));
        let pipeline = Pipeline::new(
            "test",
            vec![
                (a_name, a),
                ("B".to_string(), capture.clone() as Arc<dyn Operator>),
            ],
            &edges(&["A -> B"]),
            None,
        )
        .unwrap();

        pipeline.run(json!({})).await;
        let seen = capture.seen.lock().unwrap().clone().unwrap();
        assert!(matches!(seen, Input::Single(_)));
    }

    #[tokio::test]
    async fn test_fanin_is_ordered_list_of_envelopes() {
        let capture = Capture::new("D");
        let (a_name, a) = Emit::node("A", json!("from_a"));
        let pipeline = Pipeline::new(
            "test",
            vec![
                (a_name, a),
                Pass::node("B"),
                Pass::node("C"),
                ("D".to_string(), capture.clone() as Arc<dyn Operator>),
            ],
            &edges(&["A -> B", "A -> C", "B -> D", "C -> D"]),
            None,
        )
        .unwrap();

        pipeline.run(json!({})).await;
        let seen = capture.seen.lock().unwrap().clone().unwrap();
        match seen {
            Input::Fanin(envs) => {
                assert_eq!(envs.len(), 2);
                assert_eq!(envs[0].data, json!("from_a"));
                assert_eq!(envs[1].data, json!("from_a"));
            }
            other => panic!("expected fan-in input, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminal_override() {
        let (a_name, a) = Emit::node("A", json!("a"));
        let (b_name, b) = Emit::node("B", json!("b"));
        let pipeline = Pipeline::new(
            "test",
            vec![
                (a_name, a),
                (b_name, b),
                Pass::node("C"),
                Pass::node("D"),
            ],
            &edges(&["A -> B", "A -> C", "B -> D", "C -> D"]),
            Some("B"),
        )
        .unwrap();

        let out = pipeline.run(json!({})).await;
        assert_eq!(out.data, json!("b"));
    }

    #[tokio::test]
    async fn test_single_node_is_its_own_terminal() {
        let (a_name, a) = Emit::node("A", json!(1));
        let pipeline = Pipeline::new("test", vec![(a_name, a)], &[], None).unwrap();
        let out = pipeline.run(json!({})).await;
        assert_eq!(out.data, json!(1));
    }

    #[tokio::test]
    async fn test_every_node_runs_exactly_once() {
        let (a_name, a) = Emit::node("A", json!(1));
        let (b_name, b) = Emit::node("B", json!(2));
        let (c_name, c) = Emit::node("C", json!(3));
        let (d_name, d) = Emit::node("D", json!(4));
        let counters = [a.clone(), b.clone(), c.clone(), d.clone()];

        let pipeline = Pipeline::new(
            "test",
            vec![(a_name, a), (b_name, b), (c_name, c), (d_name, d)],
            &edges(&["A -> B", "A -> C", "B -> D", "C -> D"]),
            None,
        )
        .unwrap();

        pipeline.run(json!({})).await;
        for op in &counters {
            assert_eq!(op.calls.load(Ordering::SeqCst), 1, "{}", op.name);
        }
    }

    #[tokio::test]
    async fn test_failed_node_yields_coded_envelope() {
        let pipeline = Pipeline::new(
            "test",
            vec![
                (
                    "A".to_string(),
                    Arc::new(Panics {
                        name: "A".to_string(),
                    }) as Arc<dyn Operator>,
                ),
                Pass::node("B"),
            ],
            &edges(&["A -> B"]),
            None,
        )
        .unwrap();

        let out = pipeline.run(json!({})).await;
        // B forwards A's substituted error envelope untouched.
        assert_eq!(out.code, CODE_BAD_INPUT);
        assert_eq!(out.data, Value::Null);
    }

    #[tokio::test]
    async fn test_state_updates_visible_downstream() {
        struct WriteState {
            name: String,
        }

        #[async_trait]
        impl Operator for WriteState {
            fn name(&self) -> &str {
                &self.name
            }

            async fn apply(&self, mut state: Value, data: Value) -> (Value, Envelope) {
                crate::state::deep_merge(&mut state, &json!({"wrote": true}), true);
                (state, Envelope::ok(data))
            }
        }

        struct ReadState {
            name: String,
        }

        #[async_trait]
        impl Operator for ReadState {
            fn name(&self) -> &str {
                &self.name
            }

            async fn apply(&self, state: Value, _data: Value) -> (Value, Envelope) {
                let wrote = state["wrote"].clone();
                (state, Envelope::ok(wrote))
            }
        }

        let pipeline = Pipeline::new(
            "test",
            vec![
                (
                    "A".to_string(),
                    Arc::new(WriteState {
                        name: "A".to_string(),
                    }) as Arc<dyn Operator>,
                ),
                (
                    "B".to_string(),
                    Arc::new(ReadState {
                        name: "B".to_string(),
                    }) as Arc<dyn Operator>,
                ),
            ],
            &edges(&["A -> B"]),
            None,
        )
        .unwrap();

        let out = pipeline.run(json!({})).await;
        assert_eq!(out.data, json!(true));
    }

    #[tokio::test]
    async fn test_unknown_terminal_rejected_at_construction() {
        let (a_name, a) = Emit::node("A", json!(1));
        let err = Pipeline::new("test", vec![(a_name, a)], &[], Some("Z")).unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }
}
