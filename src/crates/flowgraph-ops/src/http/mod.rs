//! HTTP-family operators
//!
//! [`rest`], [`feed`], and [`html`] share one request core: URL templating
//! from the per-call `urlcomp` map, header merging, TLS policy, a bounded
//! retry loop with randomized sleeps, and the double response-size cap.
//! They differ only in how the response body is decoded.

use flowgraph_core::envelope::{
    Envelope, CODE_BAD_INPUT, CODE_BAD_PAYLOAD, CODE_TARGET_ERROR, CODE_TIMEOUT,
};
use flowgraph_core::error::{FlowError, Result};
use rand::Rng;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

pub mod feed;
pub mod html;
pub mod rest;
mod tags;

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> f64 {
    300.0
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_retry_sleep() -> u64 {
    10
}

fn default_max_response_size() -> usize {
    10 * 1024 * 1024
}

/// Configuration shared by the HTTP-family operators
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// URL template with `{name}` placeholders
    pub url: String,
    /// `GET` or `POST`
    #[serde(default = "default_method")]
    pub method: String,
    /// Static headers, merged under per-call headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Total per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// TLS verification on/off switch
    #[serde(default = "default_true")]
    pub sslenabled: bool,
    /// Skip certificate verification
    #[serde(default)]
    pub insecure: bool,
    /// PEM bundle file added to the trust store
    #[serde(default)]
    pub cafile: Option<String>,
    /// Directory of PEM files added to the trust store
    #[serde(default)]
    pub capath: Option<String>,
    /// Inline PEM data added to the trust store
    #[serde(default)]
    pub cadata: Option<String>,
    /// Attempts before a transport error is surfaced
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bound on cumulative retry sleep in seconds
    #[serde(default = "default_max_retry_sleep")]
    pub max_retry_sleep: u64,
    /// Response size cap in bytes
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
    /// Unpack sub-task bound
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
}

/// A successfully fetched response, before body decoding
pub(crate) struct Fetched {
    pub req: Value,
    pub headers: Value,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// Outcome of the shared request path
pub(crate) enum FetchOutcome {
    Success(Fetched),
    Failure(i64),
}

/// Fill `{name}` placeholders in a URL template from the `urlcomp` map
pub(crate) fn fill_template(template: &str, urlcomp: Option<&Map<String, Value>>) -> String {
    let Some(components) = urlcomp else {
        return template.to_string();
    };
    let mut url = template.to_string();
    for (key, value) in components {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        url = url.replace(&format!("{{{}}}", key), &text);
    }
    url
}

/// Shared request core: client construction, templating, retry, size caps
pub(crate) struct HttpCore {
    name: String,
    config: HttpConfig,
    method: Method,
    client: reqwest::Client,
}

impl HttpCore {
    pub fn new(name: &str, config: HttpConfig) -> Result<Self> {
        let method = match config.method.to_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            other => {
                return Err(FlowError::configuration(format!(
                    "unsupported HTTP method '{}'",
                    other
                )))
            }
        };

        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs_f64(config.timeout.max(0.0)));
        if config.sslenabled && config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        for cert in load_extra_certificates(&config)? {
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| FlowError::configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.to_string(),
            config,
            method,
            client,
        })
    }

    pub fn max_tasks(&self) -> usize {
        self.config.max_tasks
    }

    /// Run the request pipeline for one call payload.
    ///
    /// `data` carries the optional `headers`, `urlcomp`, and `body` fields.
    pub async fn fetch(&self, data: &Map<String, Value>) -> FetchOutcome {
        let url = fill_template(
            &self.config.url,
            data.get("urlcomp").and_then(Value::as_object),
        );

        let mut headers = self.config.headers.clone();
        if let Some(extra) = data.get("headers").and_then(Value::as_object) {
            for (k, v) in extra {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                headers.insert(k.clone(), text);
            }
        }

        let body = data.get("body").cloned().unwrap_or_else(|| json!({}));

        let response = match self.send_with_retry(&url, &headers, &body).await {
            Ok(resp) => resp,
            Err(code) => return FetchOutcome::Failure(code),
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            tracing::error!(node = %self.name, url = %url, status = status.as_u16(), "error response");
            return FetchOutcome::Failure(CODE_TARGET_ERROR);
        }

        if let Some(advertised) = response.content_length() {
            if advertised as usize > self.config.max_response_size {
                tracing::error!(
                    node = %self.name,
                    advertised,
                    limit = self.config.max_response_size,
                    "advertised response size exceeds limit"
                );
                return FetchOutcome::Failure(CODE_BAD_INPUT);
            }
        }

        let resp_headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()),
                )
            })
            .collect();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) if e.is_timeout() => {
                tracing::error!(node = %self.name, url = %url, error = %e, "timeout reading body");
                return FetchOutcome::Failure(CODE_TIMEOUT);
            }
            Err(e) => {
                tracing::error!(node = %self.name, url = %url, error = %e, "error reading body");
                return FetchOutcome::Failure(CODE_BAD_INPUT);
            }
        };
        if bytes.len() > self.config.max_response_size {
            tracing::error!(
                node = %self.name,
                actual = bytes.len(),
                limit = self.config.max_response_size,
                "response size exceeds limit"
            );
            return FetchOutcome::Failure(CODE_BAD_INPUT);
        }

        let req = json!({
            "url": url,
            "method": self.method.as_str(),
            "headers": headers,
        });

        FetchOutcome::Success(Fetched {
            req,
            headers: Value::Object(resp_headers),
            body: bytes.to_vec(),
            content_type,
        })
    }

    /// Retry loop: up to `max_retries` attempts, sleeping a random number
    /// of seconds bounded by `attempt * (max_retry_sleep / max_retries)`
    /// between attempts. Timeouts surface immediately as 104.
    async fn send_with_retry(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &Value,
    ) -> std::result::Result<reqwest::Response, i64> {
        let attempts = self.config.max_retries.max(1);
        let per_attempt = self.config.max_retry_sleep / u64::from(attempts);

        for attempt in 1..=attempts {
            let mut request = self.client.request(self.method.clone(), url);
            for (k, v) in headers {
                request = request.header(k, v);
            }
            request = if self.method == Method::POST {
                request.json(body)
            } else {
                let params: Vec<(String, String)> = body
                    .as_object()
                    .map(|m| {
                        m.iter()
                            .map(|(k, v)| {
                                let text = match v {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                (k.clone(), text)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                request.query(&params)
            };

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => {
                    tracing::error!(node = %self.name, url = %url, error = %e, "request timeout");
                    return Err(CODE_TIMEOUT);
                }
                Err(e) => {
                    let sleep =
                        rand::thread_rng().gen_range(0..=u64::from(attempt) * per_attempt);
                    tracing::warn!(
                        node = %self.name,
                        url = %url,
                        attempt,
                        max_attempts = attempts,
                        retry_in = sleep,
                        error = %e,
                        "connection error"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(sleep)).await;
                    }
                }
            }
        }

        tracing::error!(node = %self.name, url = %url, "cannot connect after retries");
        Err(CODE_BAD_INPUT)
    }
}

fn load_extra_certificates(config: &HttpConfig) -> Result<Vec<reqwest::Certificate>> {
    if !config.sslenabled {
        return Ok(Vec::new());
    }

    let mut certs = Vec::new();
    if let Some(cafile) = &config.cafile {
        let pem = std::fs::read(cafile)?;
        certs.extend(parse_pem_bundle(&pem)?);
    }
    if let Some(capath) = &config.capath {
        for entry in std::fs::read_dir(capath)? {
            let path = entry?.path();
            if path.is_file() {
                let pem = std::fs::read(&path)?;
                certs.extend(parse_pem_bundle(&pem)?);
            }
        }
    }
    if let Some(cadata) = &config.cadata {
        certs.extend(parse_pem_bundle(cadata.as_bytes())?);
    }
    Ok(certs)
}

fn parse_pem_bundle(pem: &[u8]) -> Result<Vec<reqwest::Certificate>> {
    reqwest::Certificate::from_pem_bundle(pem)
        .map_err(|e| FlowError::configuration(format!("bad CA certificate: {}", e)))
}

/// Build the standard HTTP result body
pub(crate) fn http_body(
    req: Value,
    userdata: Value,
    headers: Value,
    body: Value,
) -> Value {
    json!({
        "req": req,
        "userdata": userdata,
        "headers": headers,
        "body": body,
    })
}

/// Failure envelope with the standard empty body
pub(crate) fn http_failure(userdata: Value, code: i64) -> Envelope {
    Envelope::failed(
        http_body(json!({}), userdata, json!({}), json!({})),
        code,
    )
}

/// Guard for non-mapping call payloads
pub(crate) fn bad_payload(name: &str, data: &Value) -> Envelope {
    tracing::error!(node = %name, got = %data, "bad request, expected a mapping");
    Envelope::failed(
        json!({"headers": {}, "body": {}}),
        CODE_BAD_PAYLOAD,
    )
}

/// Register the HTTP-family operators
pub fn register(registry: &mut flowgraph_core::OperatorRegistry) {
    rest::register(registry);
    feed::register(registry);
    html::register(registry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_template() {
        let mut comps = Map::new();
        comps.insert("id".to_string(), json!(42));
        comps.insert("kind".to_string(), json!("post"));
        assert_eq!(
            fill_template("https://x/{kind}/{id}", Some(&comps)),
            "https://x/post/42"
        );
        assert_eq!(fill_template("https://x/{id}", None), "https://x/{id}");
    }

    #[test]
    fn test_config_defaults() {
        let cfg: HttpConfig =
            serde_json::from_value(json!({"url": "https://example.org"})).unwrap();
        assert_eq!(cfg.method, "GET");
        assert_eq!(cfg.timeout, 300.0);
        assert!(cfg.sslenabled);
        assert!(!cfg.insecure);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.max_retry_sleep, 10);
        assert_eq!(cfg.max_response_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_unsupported_method_rejected() {
        let cfg: HttpConfig =
            serde_json::from_value(json!({"url": "https://x", "method": "DELETE"})).unwrap();
        assert!(HttpCore::new("n", cfg).is_err());
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_transport_error() {
        // Nothing listens on port 1; every attempt is refused.
        let cfg: HttpConfig = serde_json::from_value(json!({
            "url": "http://127.0.0.1:1/",
            "max_retries": 3,
            "max_retry_sleep": 0,
            "timeout": 5.0,
        }))
        .unwrap();
        let core = HttpCore::new("n", cfg).unwrap();

        match core.fetch(&Map::new()).await {
            FetchOutcome::Failure(code) => assert_eq!(code, CODE_BAD_INPUT),
            FetchOutcome::Success(_) => panic!("fetch cannot succeed"),
        }
    }
}
