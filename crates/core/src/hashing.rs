//! Content hashing for staleness detection
//!
//! Every artifact that influences the shape of a workspace's containers is
//! hashed with SHA-256. The *config* sub-hash is the staleness authority:
//! the reconciler compares it against the label recorded on the observed
//! container. The configuration bytes are normalized (comments and trailing
//! commas stripped, whitespace collapsed by reserialization) before hashing
//! so formatting-only edits never force a recreate.

use crate::errors::{ConfigError, DcxError, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Sub-hashes of the artifacts feeding a workspace plan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigHashes {
    /// Normalized configuration document (the staleness authority)
    pub config: String,
    /// Dockerfile contents plus serialized build args/target; empty if no build block
    pub dockerfile: String,
    /// Referenced composition files, concatenated in declaration order; empty if not compose
    pub compose: String,
    /// Canonical serialization of the resolved feature set; empty until resolved
    pub features: String,
    /// Digest over the four sub-hashes in fixed order
    pub overall: String,
}

/// Inputs to [`ConfigHashes::compute`]
#[derive(Debug, Default)]
pub struct HashInputs<'a> {
    /// Raw configuration document bytes (JSON with comments allowed)
    pub config_raw: &'a str,
    /// Dockerfile contents + serialized build args and target, when built from source
    pub dockerfile: Option<String>,
    /// Composition files as (relative path, contents), in declaration order
    pub compose_files: Vec<(String, String)>,
    /// Resolved features as (id, digest-or-integrity) pairs
    pub features: Vec<(String, String)>,
}

impl ConfigHashes {
    /// Compute all sub-hashes plus the overall hash.
    pub fn compute(inputs: &HashInputs<'_>) -> Result<Self> {
        let config = hash_config_document(inputs.config_raw)?;
        let dockerfile = match &inputs.dockerfile {
            Some(contents) => sha256_hex(contents.as_bytes()),
            None => String::new(),
        };
        let compose = if inputs.compose_files.is_empty() {
            String::new()
        } else {
            let mut hasher = Sha256::new();
            for (rel_path, contents) in &inputs.compose_files {
                hasher.update(rel_path.as_bytes());
                hasher.update(b"\n");
                hasher.update(contents.as_bytes());
            }
            hex(&hasher.finalize())
        };
        let features = hash_feature_set(&inputs.features);

        let mut overall = Sha256::new();
        overall.update(config.as_bytes());
        overall.update(dockerfile.as_bytes());
        overall.update(compose.as_bytes());
        overall.update(features.as_bytes());

        Ok(Self {
            config,
            dockerfile,
            compose,
            features,
            overall: hex(&overall.finalize()),
        })
    }

    /// Recompute the features sub-hash (and overall) once features resolve.
    pub fn with_features(mut self, features: &[(String, String)]) -> Self {
        self.features = hash_feature_set(features);
        let mut overall = Sha256::new();
        overall.update(self.config.as_bytes());
        overall.update(self.dockerfile.as_bytes());
        overall.update(self.compose.as_bytes());
        overall.update(self.features.as_bytes());
        self.overall = hex(&overall.finalize());
        self
    }

    /// 12-hex short identifier embedded in Dockerfile-plan image tags.
    pub fn config_short(&self) -> &str {
        &self.config[..12]
    }
}

/// Image tag for a Dockerfile-based plan: `dcx/<workspaceID>:<12-hex>`.
pub fn dockerfile_image_tag(workspace_id: &str, hashes: &ConfigHashes) -> String {
    format!("dcx/{}:{}", workspace_id, hashes.config_short())
}

/// Image tag for a feature-derived image: `dcx-derived-<workspaceID8>`.
pub fn derived_image_tag(workspace_short_id: &str) -> String {
    format!("dcx-derived-{}", workspace_short_id)
}

/// Hash the configuration document after normalization.
///
/// The document is parsed with a comment- and trailing-comma-tolerant parser
/// and reserialized compactly, so two documents differing only in formatting
/// hash identically. Object key order is preserved: reordering keys is a
/// content change.
pub fn hash_config_document(raw: &str) -> Result<String> {
    let value: serde_json::Value = json5::from_str(raw).map_err(|e| {
        DcxError::Config(ConfigError::Parse {
            path: "<configuration>".to_string(),
            message: e.to_string(),
        })
    })?;
    let normalized = serde_json::to_string(&value)
        .map_err(|e| DcxError::internal(format!("reserialization failed: {}", e)))?;
    Ok(sha256_hex(normalized.as_bytes()))
}

/// Canonical feature-set hash: ids sorted, each mapped to its digest.
fn hash_feature_set(features: &[(String, String)]) -> String {
    if features.is_empty() {
        return String::new();
    }
    let map: BTreeMap<&str, &str> = features
        .iter()
        .map(|(id, digest)| (id.as_str(), digest.as_str()))
        .collect();
    let canonical = serde_json::to_string(&map).unwrap_or_default();
    sha256_hex(canonical.as_bytes())
}

/// Lowercase hex SHA-256 of the given bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
