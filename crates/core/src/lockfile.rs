//! Feature lockfile
//!
//! The lockfile pins resolved feature identities (version, digest, archive
//! integrity, hard dependencies) so builds are reproducible. It lives next
//! to the configuration document under a name derived by inserting `-lock`
//! before the extension (`dcx.json` -> `dcx-lock.json`). Local-path features
//! are excluded. The file is only written by the explicit `lock` subcommand,
//! never as a side effect of `up`, and writes are atomic (temp + rename).

use crate::errors::{DcxError, Result};
use crate::features::ResolvedFeature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock entry for a single feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedFeature {
    /// Resolved semantic version
    pub version: String,
    /// Fully-pinned reference (OCI reference with digest, or the source URL)
    pub resolved: String,
    /// SHA-256 of the downloaded archive
    pub integrity: String,
    /// Hard dependencies, when declared
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// The persisted lockfile: feature id -> lock entry, sorted for stable diffs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    pub features: BTreeMap<String, LockedFeature>,
}

impl Lockfile {
    /// Build a lockfile from a resolved feature list, excluding local paths.
    pub fn from_resolved(features: &[ResolvedFeature]) -> Self {
        let mut out = Lockfile::default();
        for feature in features {
            if feature.source.is_local() {
                continue;
            }
            out.features.insert(
                feature.id.clone(),
                LockedFeature {
                    version: feature.version.clone().unwrap_or_default(),
                    resolved: match &feature.digest {
                        Some(digest) => format!("{}@{}", feature.source, digest),
                        None => feature.source.to_string(),
                    },
                    integrity: feature.integrity.clone(),
                    depends_on: feature.depends_on.clone(),
                },
            );
        }
        out
    }

    /// Compare against a freshly resolved set; returns human-readable
    /// mismatch descriptions (empty when everything matches).
    pub fn verify(&self, features: &[ResolvedFeature]) -> Vec<String> {
        let mut mismatches = Vec::new();
        let fresh = Lockfile::from_resolved(features);

        for (id, locked) in &self.features {
            match fresh.features.get(id) {
                None => mismatches.push(format!("'{}' is locked but no longer declared", id)),
                Some(current) => {
                    if current.integrity != locked.integrity {
                        mismatches.push(format!(
                            "'{}' integrity changed ({} -> {})",
                            id, locked.integrity, current.integrity
                        ));
                    } else if current.version != locked.version {
                        mismatches.push(format!(
                            "'{}' version changed ({} -> {})",
                            id, locked.version, current.version
                        ));
                    }
                }
            }
        }
        for id in fresh.features.keys() {
            if !self.features.contains_key(id) {
                mismatches.push(format!("'{}' is declared but not locked", id));
            }
        }
        mismatches
    }
}

/// Derive the lockfile path from the configuration path: the file stem gains
/// a `-lock` suffix and the `.json` extension is kept.
pub fn lockfile_path(config_path: &Path) -> PathBuf {
    let dir = config_path.parent().unwrap_or(Path::new("."));
    let stem = config_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dcx");
    dir.join(format!("{}-lock.json", stem))
}

/// Read a lockfile; a missing file is `None`, not an error.
pub fn read_lockfile(path: &Path) -> Result<Option<Lockfile>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(DcxError::Io)?;
    let lockfile: Lockfile = serde_json::from_str(&raw).map_err(|e| {
        DcxError::internal(format!("lockfile {} is corrupt: {}", path.display(), e))
    })?;
    Ok(Some(lockfile))
}

/// Write a lockfile atomically: serialize to a temp file in the same
/// directory, then rename into place.
pub fn write_lockfile(path: &Path, lockfile: &Lockfile) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let raw = serde_json::to_string_pretty(lockfile)
        .map_err(|e| DcxError::internal(format!("lockfile serialization failed: {}", e)))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(DcxError::Io)?;
    use std::io::Write;
    temp.write_all(raw.as_bytes()).map_err(DcxError::Io)?;
    temp.write_all(b"\n").map_err(DcxError::Io)?;
    temp.persist(path)
        .map_err(|e| DcxError::Io(e.error))?;
    debug!(path = %path.display(), "Wrote lockfile");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_ref::FeatureSource;
    use crate::features::FeatureMetadata;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn resolved(id: &str, source: &str, integrity: &str, version: &str) -> ResolvedFeature {
        ResolvedFeature {
            id: id.to_string(),
            source: FeatureSource::parse(source).unwrap(),
            version: Some(version.to_string()),
            digest: Some("sha256:abc".to_string()),
            integrity: integrity.to_string(),
            metadata: FeatureMetadata {
                id: id.to_string(),
                ..Default::default()
            },
            options: IndexMap::new(),
            install_root: PathBuf::from("/tmp/f"),
            depends_on: Vec::new(),
        }
    }

    #[test]
    fn lockfile_path_inserts_lock_suffix() {
        assert_eq!(
            lockfile_path(Path::new("/w/dcx.json")),
            PathBuf::from("/w/dcx-lock.json")
        );
        assert_eq!(
            lockfile_path(Path::new("/w/.dcx/dcx.json")),
            PathBuf::from("/w/.dcx/dcx-lock.json")
        );
    }

    #[test]
    fn local_features_are_excluded() {
        let features = vec![
            resolved("ghcr.io/a/b/c:1", "ghcr.io/a/b/c:1", "i1", "1.0.0"),
            resolved("./local", "./local", "i2", "0.1.0"),
        ];
        let lockfile = Lockfile::from_resolved(&features);
        assert_eq!(lockfile.features.len(), 1);
        assert!(lockfile.features.contains_key("ghcr.io/a/b/c:1"));
    }

    #[test]
    fn read_missing_lockfile_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(read_lockfile(&tmp.path().join("dcx-lock.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dcx-lock.json");
        let features = vec![resolved("ghcr.io/a/b/c:1", "ghcr.io/a/b/c:1", "i1", "1.0.0")];
        let lockfile = Lockfile::from_resolved(&features);
        write_lockfile(&path, &lockfile).unwrap();
        let read = read_lockfile(&path).unwrap().unwrap();
        assert_eq!(read, lockfile);
    }

    #[test]
    fn verify_reports_drift_in_both_directions() {
        let locked = Lockfile::from_resolved(&[resolved(
            "ghcr.io/a/b/c:1",
            "ghcr.io/a/b/c:1",
            "i1",
            "1.0.0",
        )]);

        // Integrity drift
        let drifted = vec![resolved("ghcr.io/a/b/c:1", "ghcr.io/a/b/c:1", "i2", "1.0.0")];
        let mismatches = locked.verify(&drifted);
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].contains("integrity"));

        // Newly declared feature
        let extra = vec![
            resolved("ghcr.io/a/b/c:1", "ghcr.io/a/b/c:1", "i1", "1.0.0"),
            resolved("ghcr.io/a/b/d:2", "ghcr.io/a/b/d:2", "i3", "2.0.0"),
        ];
        let mismatches = locked.verify(&extra);
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].contains("not locked"));

        // Clean
        let same = vec![resolved("ghcr.io/a/b/c:1", "ghcr.io/a/b/c:1", "i1", "1.0.0")];
        assert!(locked.verify(&same).is_empty());
    }
}
