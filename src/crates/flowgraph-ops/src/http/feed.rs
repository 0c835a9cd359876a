//! Feed requester
//!
//! Fetches syndication feeds and normalizes them. XML responses run
//! through the hardened tree converter, then the root element picks the
//! parser: `rss` (RSS 2.0), Atom `feed`, or RDF (RSS 1.0). Non-XML
//! responses produce an empty body with a warning; malformed documents
//! return parse-error envelopes (106).

use super::tags::{atom_table, normalize_tag, parse_node, rdf_table, rss20_table};
use super::{bad_payload, http_body, http_failure, FetchOutcome, HttpConfig, HttpCore};
use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::{Envelope, CODE_PARSE_ERROR};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use flowgraph_core::util::mime::is_xml;
use flowgraph_core::util::xmltree::{parse_xml, XmlNode, XmlTreeOptions};
use serde_json::{json, Value};
use std::sync::Arc;

const ATOM_FEED: &str = "{http://www.w3.org/2005/Atom}feed";
const RDF_ROOT: &str = "{http://www.w3.org/1999/02/22-rdf-syntax-ns#}RDF";

/// Normalize a parsed feed tree by its root element
pub(crate) fn parse_feed_tree(root: &str, node: &XmlNode) -> Option<Value> {
    let root = normalize_tag(root);
    if root == "rss" {
        return node.child("channel").map(|ch| parse_node(rss20_table(), ch));
    }
    if root == ATOM_FEED {
        return Some(parse_node(atom_table(), node));
    }
    if root == RDF_ROOT {
        return Some(parse_node(rdf_table(), node));
    }
    None
}

/// HTTP requester normalizing RSS 2.0, Atom, and RDF feeds
pub struct FeedRequester {
    core: OperatorCore,
    http: HttpCore,
    limits: XmlTreeOptions,
}

#[async_trait]
impl Operator for FeedRequester {
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
        if !is_xml(content_type) {
            tracing::warn!(
                node = %self.core.name,
                content_type,
                "response is not a feed document"
            );
            let body = http_body(fetched.req, userdata, fetched.headers, json!({}));
            return (state, Envelope::ok(body));
        }

        let text = String::from_utf8_lossy(&fetched.body);
        let envelope = match parse_xml(&text, &self.limits) {
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "feed document failed to parse");
                Envelope::failed(
                    http_body(fetched.req, userdata, fetched.headers, json!({})),
                    CODE_PARSE_ERROR,
                )
            }
            Ok((root, node)) => match parse_feed_tree(&root, &node) {
                Some(body) => {
                    Envelope::ok(http_body(fetched.req, userdata, fetched.headers, body))
                }
                // An RSS document without a channel is broken.
                None if normalize_tag(&root) == "rss" => {
                    tracing::error!(node = %self.core.name, "RSS document has no channel");
                    Envelope::failed(
                        http_body(fetched.req, userdata, fetched.headers, json!({})),
                        CODE_PARSE_ERROR,
                    )
                }
                // Unknown roots keep the raw tree.
                None => Envelope::ok(http_body(
                    fetched.req,
                    userdata,
                    fetched.headers,
                    json!({ root: node.to_value() }),
                )),
            },
        };
        (state, envelope)
    }
}

/// Register the feed operator
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "FeedRequester",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: HttpConfig = parse_config(config)?;
            let limits = XmlTreeOptions {
                max_size: cfg.max_response_size,
                ..XmlTreeOptions::default()
            };
            Ok(Arc::new(FeedRequester {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                http: HttpCore::new(name, cfg)?,
                limits,
            }) as Arc<dyn Operator>)
        }),
    );
}
