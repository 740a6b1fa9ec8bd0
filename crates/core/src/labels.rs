//! Container label schema
//!
//! Every container managed by dcx carries a versioned label set produced at
//! create time and consulted on every query. The schema version gates
//! migration: a parseable label set from an earlier schema is reported as
//! legacy (the state manager then treats the container as stale), while a
//! malformed set downgrades the container to broken.

use crate::errors::{DcxError, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const LABEL_MANAGED: &str = "io.dcx.managed";
pub const LABEL_SCHEMA_VERSION: &str = "io.dcx.schema-version";
pub const LABEL_WORKSPACE_ID: &str = "io.dcx.workspace-id";
pub const LABEL_WORKSPACE_NAME: &str = "io.dcx.workspace-name";
pub const LABEL_WORKSPACE_PATH: &str = "io.dcx.workspace-path";
pub const LABEL_WORKSPACE_ROOT_HASH: &str = "io.dcx.workspace-root-hash";
pub const LABEL_PRIMARY: &str = "io.dcx.primary";
pub const LABEL_BUILD_METHOD: &str = "io.dcx.build-method";
pub const LABEL_COMPOSE_PROJECT: &str = "io.dcx.compose-project";
pub const LABEL_HASH_CONFIG: &str = "io.dcx.hash-config";
pub const LABEL_HASH_OVERALL: &str = "io.dcx.hash-overall";

/// Current label schema version. Version 1 predates the split sub-hashes and
/// is recognized only to force migration.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// How the container's image came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMethod {
    Image,
    Dockerfile,
    Compose,
}

impl fmt::Display for BuildMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMethod::Image => write!(f, "image"),
            BuildMethod::Dockerfile => write!(f, "dockerfile"),
            BuildMethod::Compose => write!(f, "compose"),
        }
    }
}

impl FromStr for BuildMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "image" => Ok(BuildMethod::Image),
            "dockerfile" => Ok(BuildMethod::Dockerfile),
            "compose" => Ok(BuildMethod::Compose),
            other => Err(format!("unknown build method '{}'", other)),
        }
    }
}

/// Typed projection of the label map attached to a managed container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    pub workspace_id: String,
    /// Sanitized project name; empty when the workspace is unnamed
    pub workspace_name: String,
    pub workspace_path: String,
    pub workspace_root_hash: String,
    pub primary: bool,
    pub build_method: BuildMethod,
    /// Compose project name; empty for single-container plans
    pub compose_project: String,
    pub hash_config: String,
    pub hash_overall: String,
}

impl LabelSet {
    /// Emit the label map to attach at container-create time.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(
            LABEL_SCHEMA_VERSION.to_string(),
            CURRENT_SCHEMA_VERSION.to_string(),
        );
        labels.insert(LABEL_WORKSPACE_ID.to_string(), self.workspace_id.clone());
        labels.insert(
            LABEL_WORKSPACE_NAME.to_string(),
            self.workspace_name.clone(),
        );
        labels.insert(
            LABEL_WORKSPACE_PATH.to_string(),
            self.workspace_path.clone(),
        );
        labels.insert(
            LABEL_WORKSPACE_ROOT_HASH.to_string(),
            self.workspace_root_hash.clone(),
        );
        labels.insert(LABEL_PRIMARY.to_string(), self.primary.to_string());
        labels.insert(
            LABEL_BUILD_METHOD.to_string(),
            self.build_method.to_string(),
        );
        labels.insert(
            LABEL_COMPOSE_PROJECT.to_string(),
            self.compose_project.clone(),
        );
        labels.insert(LABEL_HASH_CONFIG.to_string(), self.hash_config.clone());
        labels.insert(LABEL_HASH_OVERALL.to_string(), self.hash_overall.clone());
        labels
    }

    /// Parse an observed label map back into a typed record.
    ///
    /// Returns the record plus `true` when the labels came from a legacy
    /// schema (absent version or ≤ 1). A missing managed marker or any
    /// missing/malformed required key is an error; the caller downgrades the
    /// container to broken.
    pub fn parse(labels: &HashMap<String, String>) -> Result<(Self, bool)> {
        if labels.get(LABEL_MANAGED).map(String::as_str) != Some("true") {
            return Err(DcxError::internal("container lacks the managed marker"));
        }

        let schema_version = match labels.get(LABEL_SCHEMA_VERSION) {
            None => 0,
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| DcxError::internal(format!("malformed schema version '{}'", raw)))?,
        };
        if schema_version > CURRENT_SCHEMA_VERSION {
            return Err(DcxError::internal(format!(
                "label schema version {} is newer than supported {}",
                schema_version, CURRENT_SCHEMA_VERSION
            )));
        }
        let legacy = schema_version <= 1;

        let require = |key: &str| -> Result<String> {
            labels
                .get(key)
                .cloned()
                .ok_or_else(|| DcxError::internal(format!("label '{}' missing", key)))
        };

        let primary_raw = require(LABEL_PRIMARY)?;
        let primary = primary_raw
            .parse::<bool>()
            .map_err(|_| DcxError::internal(format!("malformed primary label '{}'", primary_raw)))?;

        let method_raw = require(LABEL_BUILD_METHOD)?;
        let build_method = method_raw
            .parse::<BuildMethod>()
            .map_err(DcxError::internal)?;

        let set = LabelSet {
            workspace_id: require(LABEL_WORKSPACE_ID)?,
            workspace_name: labels
                .get(LABEL_WORKSPACE_NAME)
                .cloned()
                .unwrap_or_default(),
            workspace_path: require(LABEL_WORKSPACE_PATH)?,
            workspace_root_hash: labels
                .get(LABEL_WORKSPACE_ROOT_HASH)
                .cloned()
                .unwrap_or_default(),
            primary,
            build_method,
            compose_project: labels
                .get(LABEL_COMPOSE_PROJECT)
                .cloned()
                .unwrap_or_default(),
            hash_config: require(LABEL_HASH_CONFIG)?,
            hash_overall: labels.get(LABEL_HASH_OVERALL).cloned().unwrap_or_default(),
        };
        Ok((set, legacy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LabelSet {
        LabelSet {
            workspace_id: "0123456789abcdef".to_string(),
            workspace_name: "my_app".to_string(),
            workspace_path: "/home/dev/my-app".to_string(),
            workspace_root_hash: "fedcba9876543210".to_string(),
            primary: true,
            build_method: BuildMethod::Image,
            compose_project: String::new(),
            hash_config: "c".repeat(64),
            hash_overall: "o".repeat(64),
        }
    }

    #[test]
    fn build_then_parse_is_identity() {
        let set = sample();
        let map = set.to_map();
        let (parsed, legacy) = LabelSet::parse(&map).unwrap();
        assert_eq!(parsed, set);
        assert!(!legacy);
    }

    #[test]
    fn absent_schema_version_is_legacy() {
        let mut map = sample().to_map();
        map.remove(LABEL_SCHEMA_VERSION);
        let (_, legacy) = LabelSet::parse(&map).unwrap();
        assert!(legacy);
    }

    #[test]
    fn schema_version_one_is_legacy() {
        let mut map = sample().to_map();
        map.insert(LABEL_SCHEMA_VERSION.to_string(), "1".to_string());
        let (_, legacy) = LabelSet::parse(&map).unwrap();
        assert!(legacy);
    }

    #[test]
    fn missing_managed_marker_is_an_error() {
        let mut map = sample().to_map();
        map.remove(LABEL_MANAGED);
        assert!(LabelSet::parse(&map).is_err());
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let mut map = sample().to_map();
        map.remove(LABEL_HASH_CONFIG);
        assert!(LabelSet::parse(&map).is_err());
    }

    #[test]
    fn malformed_primary_is_an_error() {
        let mut map = sample().to_map();
        map.insert(LABEL_PRIMARY.to_string(), "maybe".to_string());
        assert!(LabelSet::parse(&map).is_err());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut map = sample().to_map();
        map.insert(LABEL_SCHEMA_VERSION.to_string(), "99".to_string());
        assert!(LabelSet::parse(&map).is_err());
    }
}
