//! # flowgraph-core
//!
//! Core engine of **flowgraph**, a declarative, configuration-driven async
//! pipeline system. A pipeline is a DAG of named operator nodes; each node
//! consumes its predecessors' outputs (a single envelope or the ordered
//! fan-in list), does its work, and produces an envelope for its
//! successors. A shared JSON state threads through the whole run and is
//! deep-merged under a serial discipline; the pipeline's result is the
//! terminal node's envelope, returned as a deep copy.
//!
//! This crate holds the engine only:
//!
//! - [`envelope`] — the `(data, code)` result envelope and the
//!   single/fan-in input sum,
//! - [`operator`] — the operator contract and the uniform *unpack*
//!   adapter with its bounded sub-tasking,
//! - [`registry`] — the `(typename, version) -> factory` directory,
//! - [`graph`] / [`pipeline`] — DAG construction and the in-degree-driven
//!   scheduler,
//! - [`pool`] — keyed, bounded connection pooling behind a per-protocol
//!   strategy trait,
//! - [`state`] — the deep-merge rule for the shared state,
//! - [`config`] — the serde model of pipeline configuration files,
//! - [`transform`] — the opaque transformer collaborator seam,
//! - [`util`] — env-var substitution, duration strings, MIME matching,
//!   relaxed datetime parsing, XML tree conversion.
//!
//! The built-in operator set (HTTP, SQL, sockets, files, ...) lives in the
//! `flowgraph-ops` crate; the command-line front-end in `flowgraph-cli`.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::envelope::{Envelope, Input};
//! use flowgraph_core::operator::Operator;
//! use flowgraph_core::pipeline::Pipeline;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Operator for Hello {
//!     fn name(&self) -> &str { "hello" }
//!
//!     async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
//!         (state, Envelope::ok(json!({ "hello": data })))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = Pipeline::new(
//!     "demo",
//!     vec![("hello".to_string(), Arc::new(Hello) as Arc<dyn Operator>)],
//!     &[],
//!     None,
//! ).unwrap();
//!
//! let out = pipeline.run(json!("world")).await;
//! assert_eq!(out.data, json!({ "hello": "world" }));
//! # }
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod operator;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod state;
pub mod transform;
pub mod util;

pub use config::{FlowConfig, NodeConfig, PipelineConfig};
pub use envelope::{Envelope, Input, Output};
pub use error::{FlowError, Result};
pub use graph::Dag;
pub use operator::{unpack, Operator, OperatorCore, DEFAULT_MAX_TASKS};
pub use pipeline::Pipeline;
pub use pool::{ManagedConnection, Pool, PoolRegistry};
pub use registry::{OperatorFactory, OperatorRegistry};
pub use state::deep_merge;
pub use transform::{Transformer, TransformerRegistry, TRANSFORMERS};
