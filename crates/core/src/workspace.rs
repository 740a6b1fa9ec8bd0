//! Workspace root resolution
//!
//! The workspace root is the unit of identity: the workspace identifier is
//! derived from its normalized absolute path, so resolution must be
//! deterministic for the same directory regardless of how the user spelled
//! the path on the command line.

use crate::errors::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve the canonical workspace root path.
///
/// Symlinks and relative components are resolved where possible; a path that
/// cannot be canonicalized (e.g. not yet created) is absolutized against the
/// current directory instead so identity stays stable.
pub fn resolve_workspace_root(path: &Path) -> Result<PathBuf> {
    let resolved = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            let cwd = std::env::current_dir()?;
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                cwd.join(path)
            }
        }
    };
    debug!(workspace = %resolved.display(), "Resolved workspace root");
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolves_existing_directory_to_absolute_path() {
        let tmp = TempDir::new().unwrap();
        let root = resolve_workspace_root(tmp.path()).unwrap();
        assert!(root.is_absolute());
        assert!(root.exists());
    }

    #[test]
    fn resolution_is_stable_for_same_directory() {
        let tmp = TempDir::new().unwrap();
        let a = resolve_workspace_root(tmp.path()).unwrap();
        let b = resolve_workspace_root(&a).unwrap();
        assert_eq!(a, b);
    }
}
