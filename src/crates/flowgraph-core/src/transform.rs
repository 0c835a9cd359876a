//! Transformer collaborator seam
//!
//! The data-transformer operator delegates its actual computation to an
//! opaque, sandboxed function `(state, data) -> (state', data')`. The
//! evaluator that produces such functions (a scripting runtime, a compiled
//! rule set) lives outside this crate; the core only defines the seam and a
//! directory for named transformers the embedding application registers.
//!
//! Contract: a transformer is CPU-only, must not perform I/O, and must not
//! retain references to its inputs.

use crate::error::{FlowError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// An opaque `(state, data) -> (state', data')` function
pub trait Transformer: Send + Sync {
    /// Transform the state/data pair, returning the updated pair
    fn transform(&self, state: Value, data: Value) -> Result<(Value, Value)>;
}

impl<F> Transformer for F
where
    F: Fn(Value, Value) -> Result<(Value, Value)> + Send + Sync,
{
    fn transform(&self, state: Value, data: Value) -> Result<(Value, Value)> {
        self(state, data)
    }
}

/// Directory of named transformers
///
/// Configuration references transformers by name; the embedding application
/// fills the directory before pipelines are built.
pub struct TransformerRegistry {
    inner: OnceLock<RwLock<HashMap<String, Arc<dyn Transformer>>>>,
}

impl TransformerRegistry {
    /// Empty registry, const-constructible for `static` use
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    fn map(&self) -> &RwLock<HashMap<String, Arc<dyn Transformer>>> {
        self.inner.get_or_init(|| RwLock::new(HashMap::new()))
    }

    /// Register a transformer under `name` (replaces an existing entry)
    pub fn register(&self, name: impl Into<String>, transformer: Arc<dyn Transformer>) {
        self.map().write().insert(name.into(), transformer);
    }

    /// Look up a transformer by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Transformer>> {
        self.map().read().get(name).cloned().ok_or_else(|| {
            FlowError::Transform(format!("no transformer registered under '{}'", name))
        })
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide transformer directory
pub static TRANSFORMERS: TransformerRegistry = TransformerRegistry::new();
