//! Configuration document model
//!
//! The configuration document is JSON with comments and trailing commas
//! allowed. The core consumes the parsed struct below; exactly one build
//! source (`image`, `build`, or a compose reference) must be present.
//!
//! A smaller optional sidecar document carries per-user settings: a project
//! name, command shortcuts for `dcx run`, and `up` defaults.

use crate::errors::{ConfigError, DcxError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Candidate configuration file names, probed in order relative to the
/// workspace root.
pub const CONFIG_CANDIDATES: [&str; 2] = ["dcx.json", ".dcx/dcx.json"];

/// Sidecar file name, resolved next to the configuration document.
pub const SIDECAR_NAME: &str = "dcx.user.json";

/// A value that may be a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrList::One(s) => vec![s.clone()],
            StringOrList::Many(v) => v.clone(),
        }
    }
}

/// A forwarded port: either a bare container port or a `host:container` string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForwardPort {
    Number(u16),
    Spec(String),
}

/// `build` block of the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildSection {
    pub dockerfile: Option<String>,
    pub context: Option<String>,
    pub args: IndexMap<String, String>,
    pub target: Option<String>,
    pub cache_from: Vec<String>,
}

/// Shell probe used when resolving the remote user's environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum UserEnvProbe {
    None,
    LoginShell,
    #[default]
    LoginInteractiveShell,
    InteractiveShell,
}

/// The parsed configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DcxConfig {
    pub name: Option<String>,

    // Build source (exactly one form)
    pub image: Option<String>,
    pub build: Option<BuildSection>,
    pub docker_compose_file: Option<StringOrList>,
    pub service: Option<String>,
    pub run_services: Vec<String>,

    // Runtime
    pub remote_user: Option<String>,
    pub container_user: Option<String>,
    pub workspace_folder: Option<String>,
    pub workspace_mount: Option<String>,
    pub mounts: Vec<String>,
    pub run_args: Vec<String>,
    pub forward_ports: Vec<ForwardPort>,
    pub container_env: IndexMap<String, String>,
    pub remote_env: IndexMap<String, String>,
    pub privileged: Option<bool>,
    pub init: Option<bool>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub entrypoint: Option<String>,
    pub override_command: Option<bool>,
    pub update_remote_user_uid: Option<bool>,
    pub shutdown_action: Option<String>,
    pub user_env_probe: Option<UserEnvProbe>,

    // Features
    pub features: IndexMap<String, serde_json::Value>,
    pub override_feature_install_order: Option<Vec<String>>,

    // Lifecycle hooks (string | sequence | named-sequence; parsed lazily)
    pub initialize_command: Option<serde_json::Value>,
    pub on_create_command: Option<serde_json::Value>,
    pub update_content_command: Option<serde_json::Value>,
    pub post_create_command: Option<serde_json::Value>,
    pub post_start_command: Option<serde_json::Value>,
    pub post_attach_command: Option<serde_json::Value>,
}

/// The build-plan variants are a closed sum: dispatch on the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildPlan {
    Image(String),
    Dockerfile(BuildSection),
    Compose {
        files: Vec<String>,
        service: String,
        run_services: Vec<String>,
    },
}

impl DcxConfig {
    /// Locate the configuration document for a workspace.
    pub fn discover(workspace: &Path) -> Result<PathBuf> {
        for candidate in CONFIG_CANDIDATES {
            let path = workspace.join(candidate);
            if path.is_file() {
                debug!(path = %path.display(), "Discovered configuration");
                return Ok(path);
            }
        }
        Err(DcxError::Config(ConfigError::NotFound {
            path: workspace.display().to_string(),
        }))
    }

    /// Load and parse a configuration document, returning the raw bytes too
    /// (the raw form feeds the config hash).
    pub fn load(path: &Path) -> Result<(Self, String)> {
        let raw = std::fs::read_to_string(path).map_err(DcxError::Io)?;
        let config: DcxConfig = json5::from_str(&raw).map_err(|e| {
            DcxError::Config(ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok((config, raw))
    }

    /// Validate that exactly one build source is present.
    pub fn validate(&self) -> Result<()> {
        let has_image = self.image.is_some();
        let has_build = self.build.is_some();
        let has_compose = self.docker_compose_file.is_some();

        let count = [has_image, has_build, has_compose]
            .iter()
            .filter(|b| **b)
            .count();
        if count == 0 {
            return Err(DcxError::Config(ConfigError::Validation {
                message: "one of 'image', 'build', or 'dockerComposeFile' is required".to_string(),
            }));
        }
        if count > 1 {
            return Err(DcxError::Config(ConfigError::Validation {
                message: "'image', 'build', and 'dockerComposeFile' are mutually exclusive"
                    .to_string(),
            }));
        }
        if has_compose && self.service.is_none() {
            return Err(DcxError::Config(ConfigError::Validation {
                message: "'service' is required with 'dockerComposeFile'".to_string(),
            }));
        }
        Ok(())
    }

    /// Project the validated build source into the closed plan type.
    pub fn build_plan(&self) -> Result<BuildPlan> {
        self.validate()?;
        if let Some(image) = &self.image {
            return Ok(BuildPlan::Image(image.clone()));
        }
        if let Some(build) = &self.build {
            return Ok(BuildPlan::Dockerfile(build.clone()));
        }
        let files = self
            .docker_compose_file
            .as_ref()
            .map(StringOrList::to_vec)
            .unwrap_or_default();
        Ok(BuildPlan::Compose {
            files,
            service: self.service.clone().unwrap_or_default(),
            run_services: self.run_services.clone(),
        })
    }

    /// Whether this configuration is compose-based.
    pub fn uses_compose(&self) -> bool {
        self.docker_compose_file.is_some()
    }

    /// The user lifecycle commands run as, after substitution.
    pub fn effective_user(&self) -> Option<&str> {
        self.remote_user
            .as_deref()
            .or(self.container_user.as_deref())
    }
}

/// `up` defaults carried in the sidecar document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpDefaults {
    pub ssh: bool,
    pub no_agent: bool,
}

/// A shortcut is either a plain expansion string or an object with a prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShortcutSpec {
    Expansion(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        prefix: String,
        #[serde(default)]
        pass_args: bool,
        #[serde(default)]
        description: Option<String>,
    },
}

/// The optional per-user sidecar document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SidecarConfig {
    pub name: Option<String>,
    pub shortcuts: IndexMap<String, ShortcutSpec>,
    pub up: UpDefaults,
}

impl SidecarConfig {
    /// Load the sidecar next to the configuration document, if present.
    pub fn load_next_to(config_path: &Path) -> Result<Option<Self>> {
        let dir = config_path.parent().unwrap_or(Path::new("."));
        let path = dir.join(SIDECAR_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).map_err(DcxError::Io)?;
        let sidecar: SidecarConfig = json5::from_str(&raw).map_err(|e| {
            DcxError::Config(ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        })?;
        Ok(Some(sidecar))
    }

    /// Expand a shortcut invocation into the argv to exec.
    ///
    /// String values expand exactly; object values expand the prefix and, with
    /// `passArgs`, append the caller's extra arguments.
    pub fn resolve_shortcut(&self, name: &str, extra: &[String]) -> Result<Vec<String>> {
        let spec = self.shortcuts.get(name).ok_or_else(|| {
            DcxError::Config(ConfigError::Validation {
                message: format!(
                    "unknown shortcut '{}'; defined: {}",
                    name,
                    self.shortcuts
                        .keys()
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
        })?;

        let tokenize = |s: &str| -> Result<Vec<String>> {
            shell_words::split(s).map_err(|e| {
                DcxError::Config(ConfigError::Validation {
                    message: format!("shortcut '{}' does not tokenize: {}", name, e),
                })
            })
        };

        match spec {
            ShortcutSpec::Expansion(s) => tokenize(s),
            ShortcutSpec::Detailed {
                prefix, pass_args, ..
            } => {
                let mut argv = tokenize(prefix)?;
                if *pass_args {
                    argv.extend(extra.iter().cloned());
                }
                Ok(argv)
            }
        }
    }
}
