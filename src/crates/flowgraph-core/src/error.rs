//! Error types for pipeline construction and execution
//!
//! Faults fall into two families. Construction-time faults (unknown operator
//! type, duplicate node name, cycle, bad configuration) are fatal and surface
//! as [`FlowError`] values. Runtime faults inside operators are *not* errors
//! at this level: operators convert them to coded envelopes
//! (see [`crate::envelope`]) and the pipeline keeps running.

use thiserror::Error;

/// Convenience result type using [`FlowError`]
pub type Result<T> = std::result::Result<T, FlowError>;

/// Fatal error raised while building or driving a pipeline
#[derive(Error, Debug)]
pub enum FlowError {
    /// Pipeline structure validation failed
    ///
    /// **Common causes**: duplicate node name, edge endpoint that is not a
    /// declared node, cyclic `digraph`, unknown `last` node.
    #[error("pipeline validation failed: {0}")]
    Validation(String),

    /// No factory registered for the requested operator type/version
    #[error("no operator registered for type '{typename}' version '{version}'")]
    RegistryMiss {
        /// Requested operator type name
        typename: String,
        /// Requested operator version
        version: String,
    },

    /// Operator configuration could not be interpreted
    #[error("operator configuration error: {0}")]
    Configuration(String),

    /// Connection pool failure (exhausted after close, connect error)
    #[error("connection pool '{pool}' error: {error}")]
    Pool {
        /// Pool key (the operator's configured name)
        pool: String,
        /// Error description
        error: String,
    },

    /// Transformer collaborator failure
    #[error("transformer error: {0}")]
    Transform(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error (pipeline configuration files)
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a pool error with the pool key as context
    pub fn pool(pool: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Pool {
            pool: pool.into(),
            error: error.to_string(),
        }
    }
}
