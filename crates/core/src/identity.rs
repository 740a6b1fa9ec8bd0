//! Workspace identity
//!
//! A workspace is identified by its normalized absolute path: the identifier
//! is the first 16 hex characters of a SHA-256 digest over that path. It is
//! path-derived, not content-derived, so moving a workspace abandons the old
//! identity. A user-supplied project name, when present and valid after
//! sanitization, is preferred for container naming.

use crate::errors::{ConfigError, DcxError, Result};
use crate::workspace::resolve_workspace_root;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// Suffix appended to SSH host aliases managed by dcx
pub const SSH_HOST_SUFFIX: &str = "dcx";

/// Stable identity of a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceIdentity {
    /// Content-addressed identifier of the normalized workspace path (16 hex chars)
    pub workspace_id: String,
    /// Sanitized human project name, preferred over the id for naming
    pub project_name: Option<String>,
    /// Normalized absolute workspace path
    pub workspace_path: std::path::PathBuf,
}

impl WorkspaceIdentity {
    /// Derive the identity for a workspace directory and optional user-supplied name.
    pub fn derive(workspace: &Path, name: Option<&str>) -> Result<Self> {
        let workspace_path = resolve_workspace_root(workspace)?;
        let workspace_id = hash_path(&workspace_path);
        let project_name = match name {
            Some(raw) => Some(sanitize_project_name(raw)?),
            None => None,
        };
        debug!(
            workspace_id = %workspace_id,
            project_name = ?project_name,
            "Derived workspace identity"
        );
        Ok(Self {
            workspace_id,
            project_name,
            workspace_path,
        })
    }

    /// The name-or-id used wherever a human-facing identifier is needed.
    pub fn display_name(&self) -> &str {
        self.project_name.as_deref().unwrap_or(&self.workspace_id)
    }

    /// Deterministic name for the primary container.
    pub fn container_name(&self) -> String {
        format!("dcx-{}", self.display_name())
    }

    /// Canonical host alias used by the SSH bridge config.
    pub fn ssh_host(&self) -> String {
        format!("{}.{}", self.display_name(), SSH_HOST_SUFFIX)
    }

    /// Hash of the workspace id itself, stored as a label for sibling lookup.
    pub fn root_hash(&self) -> String {
        let digest = Sha256::digest(self.workspace_id.as_bytes());
        hex_prefix(&digest, 16)
    }

    /// First 8 hex characters of the workspace id, used in derived image tags.
    pub fn short_id(&self) -> &str {
        &self.workspace_id[..8]
    }
}

/// Hash a normalized path into the 16-hex workspace identifier.
fn hash_path(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

/// Sanitize a user-supplied project name for use in container and host names.
///
/// Lowercases, maps anything outside `[a-z0-9_-]` to `_`, collapses runs of
/// `_`, and trims leading/trailing `_` and `-`. An empty result is rejected.
pub fn sanitize_project_name(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for ch in raw.to_lowercase().chars() {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_' {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches(|c| c == '_' || c == '-').to_string();
    if trimmed.is_empty() {
        return Err(DcxError::Config(ConfigError::Validation {
            message: format!("project name '{}' sanitizes to an empty string", raw),
        }));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn workspace_id_is_16_hex_and_path_stable() {
        let tmp = TempDir::new().unwrap();
        let a = WorkspaceIdentity::derive(tmp.path(), None).unwrap();
        let b = WorkspaceIdentity::derive(tmp.path(), None).unwrap();
        assert_eq!(a.workspace_id, b.workspace_id);
        assert_eq!(a.workspace_id.len(), 16);
        assert!(a.workspace_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_paths_get_different_ids() {
        let t1 = TempDir::new().unwrap();
        let t2 = TempDir::new().unwrap();
        let a = WorkspaceIdentity::derive(t1.path(), None).unwrap();
        let b = WorkspaceIdentity::derive(t2.path(), None).unwrap();
        assert_ne!(a.workspace_id, b.workspace_id);
    }

    #[test]
    fn name_is_preferred_for_container_and_ssh_host() {
        let tmp = TempDir::new().unwrap();
        let id = WorkspaceIdentity::derive(tmp.path(), Some("My App")).unwrap();
        assert_eq!(id.project_name.as_deref(), Some("my_app"));
        assert_eq!(id.container_name(), "dcx-my_app");
        assert_eq!(id.ssh_host(), "my_app.dcx");
    }

    #[test]
    fn sanitization_collapses_and_trims() {
        assert_eq!(sanitize_project_name("My  Cool App!").unwrap(), "my_cool_app");
        assert_eq!(sanitize_project_name("__hello__").unwrap(), "hello");
        assert_eq!(sanitize_project_name("a--b").unwrap(), "a--b");
        assert_eq!(sanitize_project_name("Grüße").unwrap(), "gr_e");
        assert!(sanitize_project_name("!!!").is_err());
    }
}
