//! Variable substitution for configuration values
//!
//! Supports the placeholders that influence container creation and lifecycle
//! execution: `${localWorkspaceFolder}`, `${localWorkspaceFolderBasename}`,
//! `${containerWorkspaceFolder}`, and `${localEnv:VAR[:default]}`. Unknown
//! placeholders are left verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z]+)(?::([^}]*))?\}").expect("static regex"));

/// Values available to substitution
#[derive(Debug, Clone)]
pub struct SubstitutionContext {
    pub local_workspace_folder: String,
    pub container_workspace_folder: String,
}

impl SubstitutionContext {
    pub fn new(local_workspace: &Path, container_workspace: &str) -> Self {
        Self {
            local_workspace_folder: local_workspace.display().to_string(),
            container_workspace_folder: container_workspace.to_string(),
        }
    }

    /// Substitute all recognized placeholders in a string.
    pub fn substitute(&self, input: &str) -> String {
        PLACEHOLDER
            .replace_all(input, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                let arg = caps.get(2).map(|m| m.as_str());
                match (name, arg) {
                    ("localWorkspaceFolder", None) => self.local_workspace_folder.clone(),
                    ("localWorkspaceFolderBasename", None) => {
                        Path::new(&self.local_workspace_folder)
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    }
                    ("containerWorkspaceFolder", None) => self.container_workspace_folder.clone(),
                    ("localEnv", Some(spec)) => {
                        let (var, default) = match spec.split_once(':') {
                            Some((v, d)) => (v, Some(d)),
                            None => (spec, None),
                        };
                        std::env::var(var)
                            .ok()
                            .or_else(|| default.map(str::to_string))
                            .unwrap_or_default()
                    }
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Substitute an optional value in place.
    pub fn substitute_opt(&self, input: &mut Option<String>) {
        if let Some(value) = input {
            *value = self.substitute(value);
        }
    }
}
