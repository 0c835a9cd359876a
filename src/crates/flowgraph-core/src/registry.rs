//! Operator registry
//!
//! Maps `(typename, version)` to an operator factory. The registry is
//! pipeline-scoped: extension loaders insert their factories during an
//! explicit init phase and the scheduler resolves node descriptors against
//! it at construction time. After loading it is only read, so sharing a
//! registry between pipelines is safe.

use crate::error::{FlowError, Result};
use crate::operator::Operator;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory invoked with `(node_name, config)` to build an operator instance
pub type OperatorFactory =
    Arc<dyn Fn(&str, &Value) -> Result<Arc<dyn Operator>> + Send + Sync>;

/// Directory of operator factories keyed by `(typename, version)`
#[derive(Default)]
pub struct OperatorRegistry {
    factories: HashMap<String, HashMap<String, OperatorFactory>>,
}

impl OperatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `(typename, version)`.
    ///
    /// The first registration for a pair wins; later ones are ignored, so
    /// loading an extension twice is harmless.
    pub fn register(
        &mut self,
        typename: impl Into<String>,
        version: impl Into<String>,
        factory: OperatorFactory,
    ) {
        self.factories
            .entry(typename.into())
            .or_default()
            .entry(version.into())
            .or_insert(factory);
    }

    /// Whether a factory is registered for `(typename, version)`
    pub fn contains(&self, typename: &str, version: &str) -> bool {
        self.factories
            .get(typename)
            .is_some_and(|v| v.contains_key(version))
    }

    /// Look up the factory for `(typename, version)`
    pub fn get(&self, typename: &str, version: &str) -> Result<&OperatorFactory> {
        self.factories
            .get(typename)
            .and_then(|v| v.get(version))
            .ok_or_else(|| FlowError::RegistryMiss {
                typename: typename.to_string(),
                version: version.to_string(),
            })
    }

    /// Build an operator instance for a node descriptor
    pub fn build(
        &self,
        typename: &str,
        version: &str,
        name: &str,
        config: &Value,
    ) -> Result<Arc<dyn Operator>> {
        let factory = self.get(typename, version)?;
        factory(name, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo {
        name: String,
    }

    #[async_trait]
    impl Operator for Echo {
        fn name(&self) -> &str {
            &self.name
        }

        async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
            (state, Envelope::ok(data))
        }
    }

    fn echo_factory() -> OperatorFactory {
        Arc::new(|name, _config| {
            Ok(Arc::new(Echo {
                name: name.to_string(),
            }) as Arc<dyn Operator>)
        })
    }

    #[test]
    fn test_register_and_build() {
        let mut registry = OperatorRegistry::new();
        registry.register("Echo", "1.0", echo_factory());

        assert!(registry.contains("Echo", "1.0"));
        let op = registry.build("Echo", "1.0", "node_a", &json!({})).unwrap();
        assert_eq!(op.name(), "node_a");
    }

    #[test]
    fn test_miss_is_an_error() {
        let registry = OperatorRegistry::new();
        let err = match registry.get("Nope", "1.0") {
            Err(err) => err,
            Ok(_) => panic!("expected a registry miss"),
        };
        assert!(matches!(err, FlowError::RegistryMiss { .. }));
    }

    #[test]
    fn test_unknown_version_is_a_miss() {
        let mut registry = OperatorRegistry::new();
        registry.register("Echo", "1.0", echo_factory());
        assert!(!registry.contains("Echo", "2.0"));
        assert!(registry.get("Echo", "2.0").is_err());
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = OperatorRegistry::new();
        registry.register("Echo", "1.0", echo_factory());
        registry.register(
            "Echo",
            "1.0",
            Arc::new(|_, _| {
                Err(FlowError::configuration("should never be called"))
            }),
        );

        assert!(registry.build("Echo", "1.0", "n", &json!({})).is_ok());
    }
}
