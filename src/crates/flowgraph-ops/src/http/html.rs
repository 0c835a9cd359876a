//! HTML requester
//!
//! Fetches pages and converts them to the XML tree shape with the relaxed
//! HTML mode of the tree converter, so downstream transformers can walk
//! the document without a DOM library.

use super::{bad_payload, http_body, http_failure, FetchOutcome, HttpConfig, HttpCore};
use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::{Envelope, CODE_PARSE_ERROR};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use flowgraph_core::util::mime::{is_html, split_mime};
use flowgraph_core::util::xmltree::{parse_xml, XmlTreeOptions};
use serde_json::{json, Value};
use std::sync::Arc;

/// HTTP requester converting HTML pages to the tree shape
pub struct HtmlRequester {
    core: OperatorCore,
    http: HttpCore,
    limits: XmlTreeOptions,
}

#[async_trait]
impl Operator for HtmlRequester {
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

        let fetched = match self.http.fetch(payload).await {
            FetchOutcome::Failure(code) => return (state, http_failure(userdata, code)),
            FetchOutcome::Success(fetched) => fetched,
        };

        let content_type = fetched.content_type.as_deref().unwrap_or("");
        let (media, _params) = split_mime(content_type);
        if !is_html(&media) {
            tracing::warn!(
                node = %self.core.name,
                content_type,
                "response is not an HTML document"
            );
            let body = http_body(fetched.req, userdata, fetched.headers, json!({}));
            return (state, Envelope::ok(body));
        }

        let text = String::from_utf8_lossy(&fetched.body);
        let envelope = match parse_xml(&text, &self.limits) {
            Ok((root, node)) => Envelope::ok(http_body(
                fetched.req,
                userdata,
                fetched.headers,
                json!({ root: node.to_value() }),
            )),
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "page failed to parse");
                Envelope::failed(
                    http_body(fetched.req, userdata, fetched.headers, json!({})),
                    CODE_PARSE_ERROR,
                )
            }
        };
        (state, envelope)
    }
}

/// Register the HTML operator
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "HtmlRequester",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: HttpConfig = parse_config(config)?;
            let limits = XmlTreeOptions {
                max_size: cfg.max_response_size,
                relaxed: true,
                ..XmlTreeOptions::default()
            };
            Ok(Arc::new(HtmlRequester {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                http: HttpCore::new(name, cfg)?,
                limits,
            }) as Arc<dyn Operator>)
        }),
    );
}
