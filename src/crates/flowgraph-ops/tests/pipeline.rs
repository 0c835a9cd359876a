//! End-to-end pipeline scenarios over the built-in operator set

use flowgraph_core::transform::TRANSFORMERS;
use flowgraph_core::{FlowConfig, OperatorRegistry, Pipeline};
use serde_json::{json, Value};
use std::sync::Arc;

fn registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();
    flowgraph_ops::register_defaults(&mut registry);
    registry
}

fn pipeline_from_yaml(yaml: &str) -> (Pipeline, Value) {
    let config = FlowConfig::from_yaml(yaml).unwrap();
    let pipeline = Pipeline::from_config(&config.pipeline, &registry()).unwrap();
    (pipeline, config.args)
}

#[tokio::test]
async fn test_linear_chain_env_to_transformer() {
    std::env::set_var("FLOWGRAPH_E2E_X", "hello");
    TRANSFORMERS.register(
        "pick-x",
        Arc::new(|state: Value, data: Value| {
            Ok((state, json!({ "x": data["FLOWGRAPH_E2E_X"] })))
        }),
    );

    let (pipeline, args) = pipeline_from_yaml(
        r#"
pipeline:
  name: "linear"
  node:
    - name: "A"
      type: "EnvOperator"
      version: "1.0"
      config:
        vars: ["FLOWGRAPH_E2E_X"]
    - name: "B"
      type: "DataTransformer"
      version: "1.0"
      config:
        transformer: "pick-x"
  digraph:
    - A -> B
"#,
    );

    let out = pipeline.run(args).await;
    assert_eq!(out.code, 0);
    assert_eq!(out.data, json!({"x": "hello"}));
    std::env::remove_var("FLOWGRAPH_E2E_X");
}

#[tokio::test]
async fn test_fanout_fanin_transformer_sees_ordered_list() {
    std::env::set_var("FLOWGRAPH_E2E_Y", "y");
    TRANSFORMERS.register(
        "concat-list",
        Arc::new(|state: Value, data: Value| {
            let items = data.as_array().cloned().unwrap_or_default();
            Ok((state, json!({ "count": items.len(), "items": items })))
        }),
    );

    let (pipeline, args) = pipeline_from_yaml(
        r#"
pipeline:
  name: "diamond"
  node:
    - name: "A"
      type: "EnvOperator"
      version: "1.0"
      config:
        vars: ["FLOWGRAPH_E2E_Y"]
    - name: "B"
      type: "SleepOperator"
      version: "1.0"
      config:
        sleep: 0
    - name: "C"
      type: "SleepOperator"
      version: "1.0"
      config:
        sleep: 0
    - name: "D"
      type: "DataTransformer"
      version: "1.0"
      config:
        transformer: "concat-list"
  digraph:
    - A -> B
    - A -> C
    - B -> D
    - C -> D
"#,
    );

    let out = pipeline.run(args).await;
    assert_eq!(out.code, 0);
    // D's fan-in is a two-element list, one entry per predecessor.
    assert_eq!(out.data["count"], 2);
    assert_eq!(out.data["items"][0]["FLOWGRAPH_E2E_Y"], "y");
    assert_eq!(out.data["items"][1]["FLOWGRAPH_E2E_Y"], "y");
    std::env::remove_var("FLOWGRAPH_E2E_Y");
}

#[tokio::test]
async fn test_terminal_override_returns_intermediate_node() {
    TRANSFORMERS.register(
        "tag-b",
        Arc::new(|state: Value, _| Ok((state, json!("from-b")))),
    );
    TRANSFORMERS.register(
        "tag-d",
        Arc::new(|state: Value, _| Ok((state, json!("from-d")))),
    );

    let (pipeline, args) = pipeline_from_yaml(
        r#"
pipeline:
  name: "override"
  last: "B"
  node:
    - name: "A"
      type: "SleepOperator"
      version: "1.0"
      config:
        sleep: 0
    - name: "B"
      type: "DataTransformer"
      version: "1.0"
      config:
        transformer: "tag-b"
    - name: "C"
      type: "SleepOperator"
      version: "1.0"
      config:
        sleep: 0
    - name: "D"
      type: "DataTransformer"
      version: "1.0"
      config:
        transformer: "tag-d"
  digraph:
    - A -> B
    - A -> C
    - B -> D
    - C -> D
"#,
    );

    let out = pipeline.run(args).await;
    assert_eq!(out.data, json!("from-b"));
}

#[tokio::test]
async fn test_http_retry_exhaustion_envelope() {
    let (pipeline, args) = pipeline_from_yaml(
        r#"
pipeline:
  name: "refused"
  node:
    - name: "A"
      type: "RestApiRequester"
      version: "1.0"
      config:
        url: "http://127.0.0.1:1/"
        max_retries: 3
        max_retry_sleep: 0
        timeout: 5
args: {}
"#,
    );

    let out = pipeline.run(args).await;
    assert_eq!(out.code, 101);
    assert_eq!(out.data["body"], json!({}));
}

#[tokio::test]
async fn test_env_substitution_in_operator_config() {
    std::env::set_var("FLOWGRAPH_E2E_VARNAME", "FLOWGRAPH_E2E_TARGET");
    std::env::set_var("FLOWGRAPH_E2E_TARGET", "resolved");

    let (pipeline, args) = pipeline_from_yaml(
        r#"
pipeline:
  name: "env-subst"
  node:
    - name: "A"
      type: "EnvOperator"
      version: "1.0"
      config:
        vars: ["${FLOWGRAPH_E2E_VARNAME}"]
"#,
    );

    let out = pipeline.run(args).await;
    assert_eq!(out.data["FLOWGRAPH_E2E_TARGET"], "resolved");

    std::env::remove_var("FLOWGRAPH_E2E_VARNAME");
    std::env::remove_var("FLOWGRAPH_E2E_TARGET");
}

#[tokio::test]
async fn test_unknown_operator_type_is_fatal() {
    let config = FlowConfig::from_yaml(
        r#"
pipeline:
  node:
    - name: "A"
      type: "NoSuchOperator"
      version: "1.0"
"#,
    )
    .unwrap();

    assert!(Pipeline::from_config(&config.pipeline, &registry()).is_err());
}
