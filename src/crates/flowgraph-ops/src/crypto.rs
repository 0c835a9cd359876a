//! Symmetric crypto operator
//!
//! Encrypts and decrypts string payloads with a key loaded from a file
//! named per call. The cipher is AES-256-GCM; ciphertexts travel
//! base64-encoded with the random nonce prepended. Key files hold either
//! 32 raw bytes or the base64 encoding of 32 bytes.

use crate::parse_config;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flowgraph_core::envelope::{Envelope, CODE_BAD_INPUT, CODE_TARGET_ERROR};
use flowgraph_core::operator::{Operator, OperatorCore};
use flowgraph_core::registry::OperatorRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

fn default_max_tasks() -> usize {
    flowgraph_core::DEFAULT_MAX_TASKS
}

#[derive(Debug, Deserialize)]
struct CryptoConfig {
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
}

/// AES-256-GCM encrypt/decrypt of string payloads
pub struct CryptoOperator {
    core: OperatorCore,
}

fn normalize_key(raw: Vec<u8>, path: &str) -> Result<Vec<u8>, String> {
    let trimmed: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if let Ok(decoded) = BASE64.decode(&trimmed) {
        if decoded.len() == 32 {
            return Ok(decoded);
        }
    }
    if raw.len() == 32 {
        return Ok(raw);
    }
    Err(format!("key file '{}' does not hold a 32-byte key", path))
}

/// Read and normalize a 32-byte key from a key file
pub(crate) async fn load_key(path: &str) -> Result<Vec<u8>, String> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| format!("cannot read key file '{}': {}", path, e))?;
    normalize_key(raw, path)
}

/// Blocking variant for construction-time use (operator factories)
pub(crate) fn load_key_sync(path: &str) -> Result<Vec<u8>, String> {
    let raw =
        std::fs::read(path).map_err(|e| format!("cannot read key file '{}': {}", path, e))?;
    normalize_key(raw, path)
}

/// Encrypt a string payload, returning base64(nonce || ciphertext)
pub(crate) fn encrypt(key: &[u8], plaintext: &str) -> Result<String, String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| format!("encrypt failed: {}", e))?;

    let mut packed = nonce.to_vec();
    packed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(packed))
}

/// Decrypt a base64(nonce || ciphertext) payload back to a string
pub(crate) fn decrypt(key: &[u8], payload: &str) -> Result<String, String> {
    let packed = BASE64
        .decode(payload.trim())
        .map_err(|e| format!("payload is not base64: {}", e))?;
    if packed.len() < 12 {
        return Err("payload too short".to_string());
    }
    let (nonce, ciphertext) = packed.split_at(12);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| format!("decrypt failed: {}", e))?;
    String::from_utf8(plaintext).map_err(|e| format!("plaintext is not UTF-8: {}", e))
}

#[async_trait]
impl Operator for CryptoOperator {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn max_tasks(&self) -> usize {
        self.core.max_tasks
    }

    async fn apply(&self, state: Value, data: Value) -> (Value, Envelope) {
        let op = data["op"].as_str().unwrap_or("decrypt");
        let (Some(key_path), Some(payload)) = (data["key"].as_str(), data["data"].as_str())
        else {
            tracing::error!(node = %self.core.name, "expects string 'key' and 'data'");
            return (state, Envelope::failed(Value::Null, CODE_BAD_INPUT));
        };

        let key = match load_key(key_path).await {
            Ok(k) => k,
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "key load failed");
                return (state, Envelope::failed(Value::Null, CODE_TARGET_ERROR));
            }
        };

        let result = match op {
            "encrypt" => encrypt(&key, payload),
            "decrypt" => decrypt(&key, payload),
            other => {
                tracing::error!(node = %self.core.name, op = other, "unknown operation");
                return (state, Envelope::failed(Value::Null, CODE_BAD_INPUT));
            }
        };

        match result {
            Ok(text) => (state, Envelope::ok(Value::String(text))),
            Err(e) => {
                tracing::error!(node = %self.core.name, error = %e, "crypto operation failed");
                (state, Envelope::failed(Value::Null, CODE_TARGET_ERROR))
            }
        }
    }
}

/// Register the crypto operator
pub fn register(registry: &mut OperatorRegistry) {
    registry.register(
        "CryptoOperator",
        crate::OPERATOR_VERSION,
        Arc::new(|name, config| {
            let cfg: CryptoConfig = parse_config(config)?;
            Ok(Arc::new(CryptoOperator {
                core: OperatorCore::with_max_tasks(name, cfg.max_tasks),
            }) as Arc<dyn Operator>)
        }),
    );
}
