//! JWT encode/decode operator
//!
//! Key material is loaded at construction: each configured public and
//! private key file is read once and indexed by the SHA-256 hex digest of
//! its content, which doubles as the token `kid`. Encoding picks the
//! private key named by the call's `kid` (or the first loaded one), stamps
//! `iat` and the configured `exp`/`nbf`/`iss` defaults, and signs. Decoding
//! reads the unverified header to pick the public key by `kid`, then
//! validates signature, expiry, and required claims.

use crate::parse_config;
use async_trait::async_trait;
use flowgraph_core::envelope::{Envelope, CODE_BAD_INPUT, CODE_TARGET_ERROR};
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use flowgraph_core::util::duration::parse_duration;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

fn default_algorithms() -> Vec<String> {
    vec!["HS256".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct JwtConfig {
    pubkey_files: Vec<String>,
    privkey_files: Vec<String>,
    #[serde(default = "default_algorithms")]
    algorithms: Vec<String>,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default = "default_true")]
    verify_sign: bool,
    #[serde(default = "default_true")]
    verify_exp: bool,
    #[serde(default)]
    required_claims: Vec<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    not_before: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

struct KeySet {
    /// Digest -> raw key material
    by_kid: HashMap<String, Vec<u8>>,
    /// Digest of the first configured file
    default_kid: String,
}

impl KeySet {
    fn load(paths: &[String]) -> Result<Self> {
        let mut by_kid = HashMap::new();
        let mut default_kid = None;
        for path in paths {
            let content = std::fs::read(path)?;
            let kid = hex::encode(Sha256::digest(&content));
            default_kid.get_or_insert_with(|| kid.clone());
            by_kid.insert(kid, content);
        }
        let default_kid = default_kid
            .ok_or_else(|| FlowError::configuration("at least one key file is required"))?;
        Ok(Self {
            by_kid,
            default_kid,
        })
    }

    fn get(&self, kid: Option<&str>) -> Option<(&str, &[u8])> {
        let kid = kid.unwrap_or(&self.default_kid);
        self.by_kid
            .get_key_value(kid)
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

fn encoding_key(alg: Algorithm, material: &[u8]) -> std::result::Result<EncodingKey, String> {
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Ok(EncodingKey::from_secret(material))
        }
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => EncodingKey::from_rsa_pem(material).map_err(|e| e.to_string()),
        Algorithm::ES256 | Algorithm::ES384 => {
            EncodingKey::from_ec_pem(material).map_err(|e| e.to_string())
        }
        Algorithm::EdDSA => EncodingKey::from_ed_pem(material).map_err(|e| e.to_string()),
    }
}

fn decoding_key(alg: Algorithm, material: &[u8]) -> std::result::Result<DecodingKey, String> {
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Ok(DecodingKey::from_secret(material))
        }
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(material).map_err(|e| e.to_string()),
        Algorithm::ES256 | Algorithm::ES384 => {
            DecodingKey::from_ec_pem(material).map_err(|e| e.to_string())
        }
        Algorithm::EdDSA => DecodingKey::from_ed_pem(material).map_err(|e| e.to_string()),
    }
}

/// Token encode/decode with digest-indexed key sets
pub struct JwtOperator {
    core: OperatorCore,
    algorithms: Vec<Algorithm>,
    pub_keys: KeySet,
    priv_keys: KeySet,
    headers: Map<String, Value>,
    verify_sign: bool,
    verify_exp: bool,
    required_claims: Vec<String>,
    duration_secs: Option<i64>,
    not_before_secs: Option<i64>,
    issuer: Option<String>,
}

impl JwtOperator {
    fn do_encode(&self, data: &Value) -> Envelope {
        let Some(body) = data["body"].as_object() else {
            tracing::error!(node = %self.core.name, "encode body must be a mapping");
            return Envelope::failed(Value::Null, CODE_BAD_INPUT);
        };

        let kid = data["kid"].as_str();
        let Some((kid, material)) = self.priv_keys.get(kid) else {
            tracing::error!(node = %self.core.name, "unknown private key id");
            return Envelope::failed(Value::Null, CODE_BAD_INPUT);
        };

        let alg_name = data["algorithm"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", self.algorithms[0]));
        let alg = match Algorithm::from_str(&alg_name) {
            Ok(a) => a,
            Err(_) => {
                tracing::error!(node = %self.core.name, algorithm = %alg_name, "unknown algorithm");
                return Envelope::failed(Value::Null, CODE_BAD_INPUT);
            }
        };

        let mut merged = self.headers.clone();
        if let Some(extra) = data["headers"].as_object() {
            merged.extend(extra.clone());
        }
        let mut header = Header::new(alg);
        header.kid = Some(kid.to_string());
        if let Some(typ) = merged.get("typ").and_then(Value::as_str) {
            header.typ = Some(typ.to_string());
        }
        if let Some(cty) = merged.get("cty").and_then(Value::as_str) {
            header.cty = Some(cty.to_string());
        }

        let now = chrono::Utc::now().timestamp();
        let mut claims = body.clone();
        claims.entry("iat".to_string()).or_insert(json!(now));
        if let Some(duration) = self.duration_secs {
            claims
                .entry("exp".to_string())
                .or_insert(json!(now + duration));
        }
        if let Some(not_before) = self.not_before_secs {
            claims
                .entry("nbf".to_string())
                .or_insert(json!(now + not_before));
        }
        if let Some(issuer) = &self.issuer {
            claims
                .entry("iss".to_string())
                .or_insert(json!(issuer));
        }

        let key = match encoding_key(alg, material) {
            Ok(k) => k,
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "unusable private key");
                return Envelope::failed(Value::Null, CODE_TARGET_ERROR);
            }
        };

        match encode(&header, &claims, &key) {
            Ok(token) => Envelope::ok(json!({ "token": token })),
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "token signing failed");
                Envelope::failed(Value::Null, CODE_TARGET_ERROR)
            }
        }
    }

    fn do_decode(&self, data: &Value) -> Envelope {
        let Some(token) = data["token"].as_str() else {
            tracing::error!(node = %self.core.name, "decode expects a string token");
            return Envelope::failed(Value::Null, CODE_BAD_INPUT);
        };
        let headers_only = data["headers_only"].as_bool().unwrap_or(false);

        let header = match decode_header(token) {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "unreadable token header");
                return Envelope::failed(json!({"headers": null, "body": null}), CODE_TARGET_ERROR);
            }
        };
        let header_value = serde_json::to_value(&header).unwrap_or(Value::Null);

        if headers_only {
            return Envelope::ok(json!({"headers": header_value, "body": null}));
        }

        let Some((_, material)) = self.pub_keys.get(header.kid.as_deref()) else {
            tracing::error!(node = %self.core.name, "unknown public key id");
            return Envelope::failed(json!({"headers": null, "body": null}), CODE_TARGET_ERROR);
        };

        let mut validation = Validation::new(self.algorithms[0]);
        validation.algorithms = self.algorithms.clone();
        validation.validate_exp = self.verify_exp;
        validation.set_required_spec_claims(
            &self
                .required_claims
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
        );
        if !self.verify_sign {
            validation.insecure_disable_signature_validation();
        }

        let key = match decoding_key(header.alg, material) {
            Ok(k) => k,
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "unusable public key");
                return Envelope::failed(json!({"headers": null, "body": null}), CODE_TARGET_ERROR);
            }
        };

        match decode::<Value>(token, &key, &validation) {
            Ok(token_data) => {
                Envelope::ok(json!({"headers": header_value, "body": token_data.claims}))
            }
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "token validation failed");
                Envelope::failed(json!({"headers": null, "body": null}), CODE_TARGET_ERROR)
            }
        }
    }
}

#[async_trait]
impl Operator for JwtOperator {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let envelope = match data["op"].as_str().unwrap_or("encode") {
            "decode" => self.do_decode(&data),
            _ => self.do_encode(&data),
        };
        (state, envelope)
    }
}

/// Register the JWT operator
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "JwtOperator",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: JwtConfig = parse_config(config)?;

            let algorithms = cfg
                .algorithms
                .iter()
                .map(|a| {
                    Algorithm::from_str(a).map_err(|_| {
                        FlowError::configuration(format!("unknown JWT algorithm '{}'", a))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if algorithms.is_empty() {
                return Err(FlowError::configuration("no JWT algorithms configured"));
            }

            let duration_secs = cfg
                .duration
                .as_deref()
                .map(|d| parse_duration(d).map(|d| d.as_secs() as i64))
                .transpose()?;
            let not_before_secs = cfg
                .not_before
                .as_deref()
                .map(|d| parse_duration(d).map(|d| d.as_secs() as i64))
                .transpose()?;

            Ok(Arc::new(JwtOperator {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
                algorithms,
                pub_keys: KeySet::load(&cfg.pubkey_files)?,
                priv_keys: KeySet::load(&cfg.privkey_files)?,
                headers: cfg.headers,
                verify_sign: cfg.verify_sign,
                verify_exp: cfg.verify_exp,
                required_claims: cfg.required_claims,
                duration_secs,
                not_before_secs,
                issuer: cfg.issuer,
            }) as Arc<dyn Operator>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn secret_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f.flush().unwrap();
        f
    }

    fn hs256_operator(secret_path: &str) -> JwtOperator {
        JwtOperator {
            core: OperatorCore::new("jwt"),
            algorithms: vec![Algorithm::HS256],
            pub_keys: KeySet::load(&[secret_path.to_string()]).unwrap(),
            priv_keys: KeySet::load(&[secret_path.to_string()]).unwrap(),
            headers: Map::new(),
            verify_sign: true,
            verify_exp: true,
            required_claims: vec![],
            duration_secs: Some(3600),
            not_before_secs: None,
            issuer: Some("flowgraph-test".to_string()),
        }
    }

    #[tokio::test]
    async fn test_encode_decode_roundtrip() {
        let secret = secret_file(b"a shared secret for tests");
        let op = hs256_operator(secret.path().to_str().unwrap());

        let (_, encoded) = op
            .apply(
                json!({}),
                json!({"op": "encode", "body": {"sub": "user-1"}}),
            )
            .await;
        assert!(encoded.is_ok(), "encode failed: {:?}", encoded);
        let token = encoded.data["token"].as_str().unwrap().to_string();

        let (_, decoded) = op
            .apply(json!({}), json!({"op": "decode", "token": token}))
            .await;
        assert!(decoded.is_ok(), "decode failed: {:?}", decoded);
        assert_eq!(decoded.data["body"]["sub"], "user-1");
        assert_eq!(decoded.data["body"]["iss"], "flowgraph-test");
        assert!(decoded.data["body"]["iat"].is_number());
        assert!(decoded.data["body"]["exp"].is_number());
        // The kid is the digest of the key file content.
        assert_eq!(
            decoded.data["headers"]["kid"].as_str().unwrap().len(),
            64
        );
    }

    #[tokio::test]
    async fn test_headers_only_skips_validation() {
        let secret = secret_file(b"another secret");
        let op = hs256_operator(secret.path().to_str().unwrap());

        let (_, encoded) = op
            .apply(json!({}), json!({"body": {"sub": "x"}}))
            .await;
        let token = encoded.data["token"].as_str().unwrap().to_string();

        let (_, decoded) = op
            .apply(
                json!({}),
                json!({"op": "decode", "token": token, "headers_only": true}),
            )
            .await;
        assert!(decoded.is_ok());
        assert!(decoded.data["body"].is_null());
        assert_eq!(decoded.data["headers"]["alg"], "HS256");
    }

    #[tokio::test]
    async fn test_tampered_token_fails() {
        let secret = secret_file(b"secret one");
        let op = hs256_operator(secret.path().to_str().unwrap());

        let (_, encoded) = op
            .apply(json!({}), json!({"body": {"sub": "x"}}))
            .await;
        let mut token = encoded.data["token"].as_str().unwrap().to_string();
        token.push('x');

        let (_, decoded) = op
            .apply(json!({}), json!({"op": "decode", "token": token}))
            .await;
        assert_eq!(decoded.code, CODE_TARGET_ERROR);
    }

    #[tokio::test]
    async fn test_encode_non_mapping_body_is_bad_input() {
        let secret = secret_file(b"secret two");
        let op = hs256_operator(secret.path().to_str().unwrap());

        let (_, env) = op
            .apply(json!({}), json!({"op": "encode", "body": "flat"}))
            .await;
        assert_eq!(env.code, CODE_BAD_INPUT);
    }
}
