//! Feature metadata and requirements projection
//!
//! A feature is a named, versioned, installable fragment added to a base
//! image during a derived-image build. Its archive carries a
//! `devcontainer-feature.json` describing options, ordering hints, and the
//! container requirements (mounts, capabilities, privilege, init) the
//! runtime-option synthesizer must honor.

use crate::errors::{DcxError, FeatureError, Result};
use crate::feature_ref::FeatureSource;
use crate::mount::Mount;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default install entrypoint inside a feature archive
pub const DEFAULT_INSTALL_ENTRYPOINT: &str = "install.sh";

/// A feature option value supplied by the user or defaulted from metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Boolean(bool),
    String(String),
}

impl OptionValue {
    /// Render for injection as a build-time environment variable.
    pub fn as_env_value(&self) -> String {
        match self {
            OptionValue::Boolean(b) => b.to_string(),
            OptionValue::String(s) => s.clone(),
        }
    }
}

/// Option definition from feature metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureOption {
    pub r#type: Option<String>,
    pub default: Option<serde_json::Value>,
    pub description: Option<String>,
    pub r#enum: Option<Vec<String>>,
    pub proposals: Option<Vec<String>>,
}

impl FeatureOption {
    fn default_value(&self) -> Option<OptionValue> {
        match &self.default {
            Some(serde_json::Value::Bool(b)) => Some(OptionValue::Boolean(*b)),
            Some(serde_json::Value::String(s)) => Some(OptionValue::String(s.clone())),
            Some(serde_json::Value::Number(n)) => Some(OptionValue::String(n.to_string())),
            _ => None,
        }
    }
}

/// Parsed `devcontainer-feature.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureMetadata {
    pub id: String,
    pub version: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub options: IndexMap<String, FeatureOption>,
    pub container_env: IndexMap<String, String>,
    pub mounts: Vec<String>,
    pub init: Option<bool>,
    pub privileged: Option<bool>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    /// Install entrypoint relative to the archive root; defaults to install.sh
    pub entrypoint: Option<String>,
    pub installs_after: Vec<String>,
    /// Hard dependencies: reference -> options for the dependency
    pub depends_on: IndexMap<String, serde_json::Value>,
}

impl FeatureMetadata {
    /// Validate the metadata; the id is required and a declared version must
    /// be a semantic version.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(DcxError::Feature(FeatureError::Metadata {
                id: "<unknown>".to_string(),
                message: "feature id is required".to_string(),
            }));
        }
        if let Some(version) = &self.version {
            semver::Version::parse(version).map_err(|e| {
                DcxError::Feature(FeatureError::Metadata {
                    id: self.id.clone(),
                    message: format!("version '{}' is not a semantic version: {}", version, e),
                })
            })?;
        }
        Ok(())
    }

    pub fn install_entrypoint(&self) -> &str {
        self.entrypoint
            .as_deref()
            .unwrap_or(DEFAULT_INSTALL_ENTRYPOINT)
    }
}

/// Parse feature metadata from an extracted archive directory.
pub fn parse_feature_metadata(dir: &Path) -> Result<FeatureMetadata> {
    let path = dir.join("devcontainer-feature.json");
    let content = std::fs::read_to_string(&path).map_err(|e| {
        DcxError::Feature(FeatureError::Metadata {
            id: dir.display().to_string(),
            message: format!("cannot read {}: {}", path.display(), e),
        })
    })?;
    let metadata: FeatureMetadata = json5::from_str(&content).map_err(|e| {
        DcxError::Feature(FeatureError::Metadata {
            id: dir.display().to_string(),
            message: e.to_string(),
        })
    })?;
    metadata.validate()?;
    Ok(metadata)
}

/// A feature after fetch, metadata merge, and pinning
#[derive(Debug, Clone)]
pub struct ResolvedFeature {
    /// The reference as given by the user (map key and hash input)
    pub id: String,
    pub source: FeatureSource,
    /// Resolved semantic version, when the metadata declares one
    pub version: Option<String>,
    /// OCI manifest digest, when fetched from a registry
    pub digest: Option<String>,
    /// SHA-256 of the downloaded archive
    pub integrity: String,
    pub metadata: FeatureMetadata,
    /// User options merged over metadata defaults
    pub options: IndexMap<String, OptionValue>,
    /// Extracted install tree on the local filesystem
    pub install_root: PathBuf,
    /// Hard dependencies, as user-facing references
    pub depends_on: Vec<String>,
}

impl ResolvedFeature {
    /// The digest recorded in lockfiles and feature-set hashes: the manifest
    /// digest for OCI sources, the archive integrity hash otherwise.
    pub fn pin(&self) -> &str {
        self.digest.as_deref().unwrap_or(&self.integrity)
    }

    /// Environment variables injected into the feature's install layer:
    /// each option name uppercased with non-alphanumerics mapped to `_`.
    pub fn option_env(&self) -> IndexMap<String, String> {
        self.options
            .iter()
            .map(|(name, value)| {
                let key: String = name
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() {
                            c.to_ascii_uppercase()
                        } else {
                            '_'
                        }
                    })
                    .collect();
                (key, value.as_env_value())
            })
            .collect()
    }

    /// Display name for user-facing messages.
    pub fn display_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or(&self.id)
    }
}

/// Merge user-supplied option values over metadata defaults.
///
/// The user value for a feature may be `true` (no options), a version string
/// shorthand, or an object of option values. Unknown options are retained and
/// passed through as build-time environment.
pub fn merge_options(
    metadata: &FeatureMetadata,
    user_value: &serde_json::Value,
) -> IndexMap<String, OptionValue> {
    let mut merged: IndexMap<String, OptionValue> = IndexMap::new();
    for (name, option) in &metadata.options {
        if let Some(default) = option.default_value() {
            merged.insert(name.clone(), default);
        }
    }
    match user_value {
        serde_json::Value::Object(map) => {
            for (name, value) in map {
                let converted = match value {
                    serde_json::Value::Bool(b) => OptionValue::Boolean(*b),
                    serde_json::Value::String(s) => OptionValue::String(s.clone()),
                    serde_json::Value::Number(n) => OptionValue::String(n.to_string()),
                    _ => continue,
                };
                merged.insert(name.clone(), converted);
            }
        }
        serde_json::Value::String(version) => {
            merged.insert("version".to_string(), OptionValue::String(version.clone()));
        }
        _ => {}
    }
    merged
}

/// Projection of feature-declared container requirements
#[derive(Debug, Clone, Default)]
pub struct FeatureRequirements {
    pub mounts: Vec<Mount>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub privileged: bool,
    pub init: bool,
    /// Names of features that require privilege, for the user warning
    pub privileged_features: Vec<String>,
}

impl FeatureRequirements {
    /// Collect the additive requirements across an ordered feature list.
    pub fn collect(features: &[ResolvedFeature]) -> Self {
        let mut out = FeatureRequirements::default();
        for feature in features {
            out.mounts.extend(Mount::parse_all(&feature.metadata.mounts));
            for cap in &feature.metadata.cap_add {
                if !out.cap_add.contains(cap) {
                    out.cap_add.push(cap.clone());
                }
            }
            for opt in &feature.metadata.security_opt {
                if !out.security_opt.contains(opt) {
                    out.security_opt.push(opt.clone());
                }
            }
            if feature.metadata.privileged.unwrap_or(false) {
                out.privileged = true;
                out.privileged_features
                    .push(feature.display_name().to_string());
            }
            if feature.metadata.init.unwrap_or(false) {
                out.init = true;
            }
        }
        out
    }
}
