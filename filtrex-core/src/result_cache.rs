//! Content-addressed cache over compiled results.
//!
//! The fingerprint is a digest of the canonicalized configuration (object
//! keys sorted recursively), so key order in the submitted JSON never
//! changes the cache slot. Entries are zstd-compressed; any decode failure
//! is treated as a cold miss.

use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use filtrex_model::api::{CompilationResult, PreviousVersion};
use filtrex_model::config::FilterListConfig;

use crate::error::{CompilerError, Result};
use crate::kv::Kv;

/// Hex characters kept from the configuration digest.
const FINGERPRINT_LEN: usize = 16;

const ZSTD_LEVEL: i32 = 3;

/// Recursively sort object keys; array order is significant and preserved.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| key.as_str());
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Deterministic fingerprint of a job configuration.
pub fn config_fingerprint(config: &FilterListConfig) -> String {
    let value = serde_json::to_value(config).unwrap_or(Value::Null);
    fingerprint_value(&value)
}

/// Fingerprint an arbitrary configuration value (used by tests and the
/// request front-end, which fingerprints the as-submitted JSON).
pub fn fingerprint_value(value: &Value) -> String {
    let canonical = canonicalize(value);
    let serialized = canonical.to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()[..FINGERPRINT_LEN]
        .to_string()
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    kv: Kv,
    ttl: Duration,
}

fn cache_key(fingerprint: &str) -> String {
    format!("cache:{fingerprint}")
}

impl ResultCache {
    pub fn new(kv: Kv, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a compiled result. Decompression or decode failures evict
    /// the entry and report a miss so the caller recomputes cold.
    pub async fn get(&self, fingerprint: &str) -> Option<CompilationResult> {
        let key = cache_key(fingerprint);
        let compressed = match self.kv.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "result cache read failed; treating as miss");
                return None;
            }
        };

        match decode(&compressed) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(key, error = %err, "corrupt result cache entry; evicting");
                let _ = self.kv.delete(&key).await;
                None
            }
        }
    }

    /// Store a compiled result, returning a summary of the entry it
    /// displaced so the response can surface `previousVersion`.
    pub async fn store(
        &self,
        fingerprint: &str,
        result: &CompilationResult,
    ) -> Option<PreviousVersion> {
        let previous = self.get(fingerprint).await.map(|prev| PreviousVersion {
            rule_count: prev.rule_count,
            compiled_at: prev.compiled_at,
            fingerprint: fingerprint.to_string(),
        });

        match encode(result) {
            Ok(compressed) => {
                let key = cache_key(fingerprint);
                if let Err(err) = self.kv.put(&key, compressed, Some(self.ttl)).await {
                    // Cache writes log a warning and continue.
                    warn!(key, error = %err, "result cache write failed");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode compilation result"),
        }
        previous
    }
}

fn encode(result: &CompilationResult) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(result)?;
    zstd::stream::encode_all(json.as_slice(), ZSTD_LEVEL)
        .map_err(|e| CompilerError::Storage(format!("zstd encode: {e}")))
}

fn decode(compressed: &[u8]) -> Result<CompilationResult> {
    let json = zstd::stream::decode_all(compressed)
        .map_err(|e| CompilerError::Storage(format!("zstd decode: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}
