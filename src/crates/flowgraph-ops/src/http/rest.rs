//! REST API requester
//!
//! Decodes response bodies as JSON when possible, falling back to the raw
//! decoded string.

use super::{bad_payload, http_body, http_failure, FetchOutcome, HttpConfig, HttpCore};
use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::Envelope;
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use serde_json::Value;
use std::sync::Arc;

/// HTTP requester with JSON-or-string body decoding
pub struct RestApiRequester {
    core: OperatorCore,
    http: HttpCore,
}

#[async_trait]
impl Operator for RestApiRequester {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let Some(payload) = data.as_object() else {
            return (state, bad_payload(&self.core.name, &data));
        };
        let userdata = payload.get("userdata").cloned().unwrap_or(Value::Null);

        let envelope = match self.http.fetch(payload).await {
            FetchOutcome::Failure(code) => http_failure(userdata, code),
            FetchOutcome::Success(fetched) => {
                let body = match serde_json::from_slice::<Value>(&fetched.body) {
                    Ok(value) => value,
                    Err(_) => {
                        Value::String(String::from_utf8_lossy(&fetched.body).into_owned())
                    }
                };
                Envelope::ok(http_body(fetched.req, userdata, fetched.headers, body))
            }
        };
        (state, envelope)
    }
}

/// Register the REST operator
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "RestApiRequester",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: HttpConfig = parse_config(config)?;
            Ok(Arc::new(RestApiRequester {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                http: HttpCore::new(name, cfg)?,
            }) as Arc<dyn Operator>)
        }),
    );
}
