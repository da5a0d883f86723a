//! Hashing - SHA-256 for composition manifests
//!
//! Hashes are computed over canonical JSON so equal inputs hash equally
//! regardless of map ordering.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

use crate::project::ProjectId;
use crate::templates::TemplateId;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Hash of a manifest, taken with its own hash field still empty
pub fn compute_manifest_hash<T: Serialize>(manifest: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(manifest)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// job_hash = sha256(template_id : template_version : project_id : canonical placeholders : engine_version)
pub fn compute_job_hash(
    template_id: TemplateId,
    template_version: u32,
    project_id: ProjectId,
    placeholders: &impl Serialize,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(placeholders)?;
    let combined = format!(
        "{}:{}:{}:{}:{}",
        template_id, template_version, project_id, canonical, engine_version
    );
    Ok(sha256_hex(combined.as_bytes()))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
