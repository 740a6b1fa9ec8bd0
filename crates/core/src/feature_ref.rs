//! Feature reference parsing
//!
//! A feature reference names where an installable feature comes from. The
//! source kind is determined by prefix: `./` or `/` is a local path,
//! `http://`/`https://` is a tarball URL, and anything else is an OCI
//! reference of the form `registry/namespace/name[:version]`.

use crate::errors::{DcxError, FeatureError, Result};
use std::fmt;
use std::path::PathBuf;

/// Default version requested when an OCI reference carries no tag
pub const DEFAULT_VERSION: &str = "latest";

/// Where a feature's archive comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureSource {
    /// A directory on the local filesystem containing the feature tree
    Local(PathBuf),
    /// A gzipped tarball fetched over HTTP(S)
    Tarball(String),
    /// An OCI artifact in a registry
    Oci(OciFeatureRef),
}

impl fmt::Display for FeatureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureSource::Local(path) => write!(f, "{}", path.display()),
            FeatureSource::Tarball(url) => write!(f, "{}", url),
            FeatureSource::Oci(oci) => write!(f, "{}", oci),
        }
    }
}

/// A parsed OCI feature reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OciFeatureRef {
    /// Registry host, e.g. `ghcr.io`
    pub registry: String,
    /// Repository path under the registry, e.g. `devcontainers/features/node`
    pub repository: String,
    /// Requested version tag (may be `latest` or a semver range prefix)
    pub version: String,
}

impl OciFeatureRef {
    /// The last path segment, used as the feature's short name.
    pub fn name(&self) -> &str {
        self.repository
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.repository)
    }
}

impl fmt::Display for OciFeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.version)
    }
}

impl FeatureSource {
    /// Parse a user-supplied reference into its source kind.
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Err(DcxError::Feature(FeatureError::Metadata {
                id: reference.to_string(),
                message: "empty feature reference".to_string(),
            }));
        }
        if reference.starts_with("./") || reference.starts_with('/') || reference.starts_with("../")
        {
            return Ok(FeatureSource::Local(PathBuf::from(reference)));
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(FeatureSource::Tarball(reference.to_string()));
        }
        Self::parse_oci(reference)
    }

    fn parse_oci(reference: &str) -> Result<Self> {
        let (path, version) = match reference.rsplit_once(':') {
            // A colon inside the first segment would be a port, not a tag.
            Some((path, tag)) if !tag.contains('/') => (path, tag.to_string()),
            _ => (reference, DEFAULT_VERSION.to_string()),
        };

        let mut segments = path.splitn(2, '/');
        let first = segments.next().unwrap_or_default();
        let rest = segments.next();

        // The first segment is a registry host only when it looks like one.
        let (registry, repository) = match rest {
            Some(rest) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (first.to_string(), rest.to_string())
            }
            _ => ("ghcr.io".to_string(), path.to_string()),
        };

        if repository.is_empty() {
            return Err(DcxError::Feature(FeatureError::Metadata {
                id: reference.to_string(),
                message: "OCI reference has no repository path".to_string(),
            }));
        }

        Ok(FeatureSource::Oci(OciFeatureRef {
            registry,
            repository,
            version,
        }))
    }

    /// Stable key for per-run fetch memoization.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }

    /// Local-path features are excluded from the lockfile.
    pub fn is_local(&self) -> bool {
        matches!(self, FeatureSource::Local(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_prefixes() {
        assert!(matches!(
            FeatureSource::parse("./features/foo").unwrap(),
            FeatureSource::Local(_)
        ));
        assert!(matches!(
            FeatureSource::parse("/abs/feature").unwrap(),
            FeatureSource::Local(_)
        ));
        assert!(matches!(
            FeatureSource::parse("../sibling").unwrap(),
            FeatureSource::Local(_)
        ));
    }

    #[test]
    fn tarball_urls() {
        assert!(matches!(
            FeatureSource::parse("https://example.com/f.tgz").unwrap(),
            FeatureSource::Tarball(_)
        ));
    }

    #[test]
    fn oci_with_registry_and_version() {
        let parsed = FeatureSource::parse("ghcr.io/devcontainers/features/node:1.2").unwrap();
        match parsed {
            FeatureSource::Oci(oci) => {
                assert_eq!(oci.registry, "ghcr.io");
                assert_eq!(oci.repository, "devcontainers/features/node");
                assert_eq!(oci.version, "1.2");
                assert_eq!(oci.name(), "node");
            }
            other => panic!("expected OCI, got {:?}", other),
        }
    }

    #[test]
    fn oci_without_registry_defaults_to_ghcr() {
        let parsed = FeatureSource::parse("devcontainers/features/go").unwrap();
        match parsed {
            FeatureSource::Oci(oci) => {
                assert_eq!(oci.registry, "ghcr.io");
                assert_eq!(oci.repository, "devcontainers/features/go");
                assert_eq!(oci.version, "latest");
            }
            other => panic!("expected OCI, got {:?}", other),
        }
    }

    #[test]
    fn empty_reference_is_rejected() {
        assert!(FeatureSource::parse("").is_err());
    }
}
