//! Configuration model for pipelines
//!
//! A configuration file (YAML or JSON) has three top-level keys:
//!
//! ```yaml
//! ext:
//!   - http
//!   - transform
//! pipeline:
//!   name: "feeds"
//!   last: "D"            # optional terminal node
//!   node:
//!     - name: "A"
//!       type: "RestApiRequester"
//!       version: "1.0"
//!       config: { url: "https://example.org/api/{id}" }
//!     - name: "B"
//!       type: "DataTransformer"
//!       version: "1.0"
//!       config: { transformer: "normalize" }
//!   digraph:
//!     - A -> B
//! args: { id: 7 }
//! ```
//!
//! `ext` names extension loaders, `pipeline` is the DAG, and `args` is the
//! initial input handed to every root node.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Extension loaders to apply before building the pipeline
    #[serde(default)]
    pub ext: Vec<String>,

    /// The pipeline definition
    pub pipeline: PipelineConfig,

    /// Initial input passed to root nodes
    #[serde(default)]
    pub args: Value,
}

/// Pipeline definition: nodes plus directed edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, used in log events
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    /// Terminal node; defaults to the last node in topological order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,

    /// Node descriptors
    pub node: Vec<NodeConfig>,

    /// Edges as `"A -> B"` strings
    #[serde(default)]
    pub digraph: Vec<String>,
}

/// A single node descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name, unique within the pipeline
    pub name: String,

    /// Operator type name resolved against the registry
    #[serde(rename = "type")]
    pub typename: String,

    /// Operator version resolved against the registry
    pub version: String,

    /// Opaque configuration bag handed to the operator factory
    #[serde(default)]
    pub config: Value,
}

fn default_pipeline_name() -> String {
    "stream".to_string()
}

impl FlowConfig {
    /// Load a configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

impl PipelineConfig {
    /// Validate node-name uniqueness and the `last` reference.
    ///
    /// Graph-shape errors (unknown edge endpoints, cycles) are caught by
    /// [`crate::graph::Dag`] construction.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.node {
            if !seen.insert(node.name.as_str()) {
                return Err(crate::error::FlowError::validation(format!(
                    "duplicate node name: {}",
                    node.name
                )));
            }
        }

        if let Some(last) = &self.last {
            if !seen.contains(last.as_str()) {
                return Err(crate::error::FlowError::validation(format!(
                    "terminal node '{}' does not exist",
                    last
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
pipeline:
  node:
    - name: "A"
      type: "EnvOperator"
      version: "1.0"
"#;
        let cfg = FlowConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.pipeline.name, "stream");
        assert!(cfg.ext.is_empty());
        assert_eq!(cfg.pipeline.node.len(), 1);
        assert!(cfg.args.is_null());
        assert!(cfg.pipeline.validate().is_ok());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
ext:
  - http
pipeline:
  name: "feeds"
  last: "B"
  node:
    - name: "A"
      type: "RestApiRequester"
      version: "1.0"
      config:
        url: "https://example.org/{id}"
    - name: "B"
      type: "DataTransformer"
      version: "1.0"
      config:
        transformer: "normalize"
  digraph:
    - A -> B
args:
  id: 7
"#;
        let cfg = FlowConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.ext, vec!["http"]);
        assert_eq!(cfg.pipeline.last.as_deref(), Some("B"));
        assert_eq!(cfg.pipeline.node[0].typename, "RestApiRequester");
        assert_eq!(cfg.pipeline.node[0].config["url"], "https://example.org/{id}");
        assert_eq!(cfg.args["id"], 7);
        assert!(cfg.pipeline.validate().is_ok());
    }

    #[test]
    fn test_duplicate_node_name_fails_validation() {
        let yaml = r#"
pipeline:
  node:
    - name: "A"
      type: "EnvOperator"
      version: "1.0"
    - name: "A"
      type: "EnvOperator"
      version: "1.0"
"#;
        let cfg = FlowConfig::from_yaml(yaml).unwrap();
        assert!(cfg.pipeline.validate().is_err());
    }

    #[test]
    fn test_unknown_last_fails_validation() {
        let yaml = r#"
pipeline:
  last: "Z"
  node:
    - name: "A"
      type: "EnvOperator"
      version: "1.0"
"#;
        let cfg = FlowConfig::from_yaml(yaml).unwrap();
        assert!(cfg.pipeline.validate().is_err());
    }
}
