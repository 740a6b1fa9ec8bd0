//! Shared command context
//!
//! Loads everything a verb needs: workspace root, configuration (plus the
//! sidecar), identity, content hashes, and the engine client. The identifier
//! and hashes are computed per invocation and passed explicitly; nothing is
//! cached process-wide.

use anyhow::{Context as _, Result};
use dcx_core::compose::ComposeProject;
use dcx_core::config::{BuildPlan, DcxConfig, SidecarConfig};
use dcx_core::engine::Engine;
use dcx_core::hashing::{ConfigHashes, HashInputs};
use dcx_core::identity::WorkspaceIdentity;
use dcx_core::labels::{BuildMethod, LabelSet};
use dcx_core::lifecycle::{LifecycleContext, LifecycleHooks};
use dcx_core::runtime_opts::container_workspace_folder;
use dcx_core::state::{Observation, StateManager};
use dcx_core::variable::SubstitutionContext;
use dcx_core::workspace::resolve_workspace_root;
use std::path::{Path, PathBuf};

pub struct CommandContext {
    pub workspace: PathBuf,
    pub config_path: PathBuf,
    pub config: DcxConfig,
    pub raw_config: String,
    pub sidecar: Option<SidecarConfig>,
    pub identity: WorkspaceIdentity,
    pub hashes: ConfigHashes,
    pub engine: Engine,
}

impl CommandContext {
    /// Load the context for a workspace directory.
    pub fn load(workspace_arg: Option<&Path>) -> Result<Self> {
        let workspace = resolve_workspace_root(workspace_arg.unwrap_or(Path::new(".")))
            .context("resolving workspace root")?;
        let config_path = DcxConfig::discover(&workspace)?;
        let (mut config, raw_config) = DcxConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        let sidecar = SidecarConfig::load_next_to(&config_path)?;

        // The sidecar name wins over the configuration name for identity.
        let name = sidecar
            .as_ref()
            .and_then(|s| s.name.clone())
            .or_else(|| config.name.clone());
        let identity = WorkspaceIdentity::derive(&workspace, name.as_deref())?;

        // Substitute variables before anything consumes the configuration.
        let substitution = SubstitutionContext::new(
            &identity.workspace_path,
            &container_workspace_folder(&config, &identity),
        );
        apply_substitution(&mut config, &substitution);

        let hashes = compute_hashes(&workspace, &config, &raw_config, &identity)?;

        Ok(CommandContext {
            workspace,
            config_path,
            config,
            raw_config,
            sidecar,
            identity,
            hashes,
            engine: Engine::detect(),
        })
    }

    /// Observe the workspace's containers with the current config hash.
    pub async fn observe(&self) -> Result<Observation> {
        let manager = StateManager::new(&self.engine);
        Ok(manager
            .observe(&self.identity, Some(&self.hashes.config))
            .await?)
    }

    /// The label set stamped onto containers created for this plan.
    pub fn label_set(&self, build_method: BuildMethod, compose_project: &str) -> LabelSet {
        LabelSet {
            workspace_id: self.identity.workspace_id.clone(),
            workspace_name: self.identity.project_name.clone().unwrap_or_default(),
            workspace_path: self.identity.workspace_path.display().to_string(),
            workspace_root_hash: self.identity.root_hash(),
            primary: true,
            build_method,
            compose_project: compose_project.to_string(),
            hash_config: self.hashes.config.clone(),
            hash_overall: self.hashes.overall.clone(),
        }
    }

    pub fn hooks(&self) -> Result<LifecycleHooks> {
        Ok(LifecycleHooks::from_config(&self.config)?)
    }

    /// Lifecycle execution context for a container of this workspace.
    pub fn lifecycle_context(&self, container_id: &str) -> LifecycleContext {
        let env: Vec<(String, String)> = self
            .config
            .remote_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        LifecycleContext {
            container_id: container_id.to_string(),
            workspace_folder: container_workspace_folder(&self.config, &self.identity),
            remote_user: self.config.effective_user().map(str::to_string),
            env,
            host_workspace: self.workspace.clone(),
        }
    }

    pub fn build_method(&self) -> Result<BuildMethod> {
        Ok(match self.config.build_plan()? {
            BuildPlan::Image(_) => BuildMethod::Image,
            BuildPlan::Dockerfile(_) => BuildMethod::Dockerfile,
            BuildPlan::Compose { .. } => BuildMethod::Compose,
        })
    }

    /// Whether `up` should skip agent forwarding by default (sidecar).
    pub fn default_no_agent(&self) -> bool {
        self.sidecar.as_ref().map(|s| s.up.no_agent).unwrap_or(false)
    }
}

fn apply_substitution(config: &mut DcxConfig, ctx: &SubstitutionContext) {
    ctx.substitute_opt(&mut config.remote_user);
    ctx.substitute_opt(&mut config.container_user);
    ctx.substitute_opt(&mut config.workspace_mount);
    ctx.substitute_opt(&mut config.entrypoint);
    for mount in &mut config.mounts {
        *mount = ctx.substitute(mount);
    }
    for value in config.container_env.values_mut() {
        *value = ctx.substitute(value);
    }
    for value in config.remote_env.values_mut() {
        *value = ctx.substitute(value);
    }
}

fn compute_hashes(
    workspace: &Path,
    config: &DcxConfig,
    raw: &str,
    identity: &WorkspaceIdentity,
) -> Result<ConfigHashes> {
    let mut inputs = HashInputs {
        config_raw: raw,
        ..Default::default()
    };

    match config.build_plan()? {
        BuildPlan::Image(_) => {}
        BuildPlan::Dockerfile(build) => {
            let dockerfile_rel = build.dockerfile.as_deref().unwrap_or("Dockerfile");
            let dockerfile_path = workspace.join(dockerfile_rel);
            let contents = std::fs::read_to_string(&dockerfile_path)
                .with_context(|| format!("reading {}", dockerfile_path.display()))?;
            let mut material = contents;
            // Build args and target are part of the image's identity.
            for (key, value) in &build.args {
                material.push_str(&format!("\narg:{}={}", key, value));
            }
            if let Some(target) = &build.target {
                material.push_str(&format!("\ntarget:{}", target));
            }
            inputs.dockerfile = Some(material);
        }
        BuildPlan::Compose { .. } => {
            let project = ComposeProject::from_config(config, identity)?;
            inputs.compose_files = project.read_files()?;
        }
    }

    Ok(ConfigHashes::compute(&inputs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_workspace(contents: &str) -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("dcx.json"), contents).unwrap();
        tmp
    }

    #[test]
    fn loads_config_identity_and_hashes() {
        let tmp = seed_workspace(r#"{"name": "Demo App", "image": "alpine:3.19"}"#);
        let ctx = CommandContext::load(Some(tmp.path())).unwrap();
        assert_eq!(ctx.identity.project_name.as_deref(), Some("demo_app"));
        assert_eq!(ctx.hashes.config.len(), 64);
        assert!(ctx.hashes.dockerfile.is_empty());
        assert_eq!(ctx.build_method().unwrap(), BuildMethod::Image);
    }

    #[test]
    fn sidecar_name_wins_over_config_name() {
        let tmp = seed_workspace(r#"{"name": "from config", "image": "alpine"}"#);
        std::fs::write(
            tmp.path().join("dcx.user.json"),
            r#"{"name": "From Sidecar"}"#,
        )
        .unwrap();
        let ctx = CommandContext::load(Some(tmp.path())).unwrap();
        assert_eq!(ctx.identity.project_name.as_deref(), Some("from_sidecar"));
    }

    #[test]
    fn dockerfile_plan_hashes_the_dockerfile() {
        let tmp = seed_workspace(r#"{"build": {"dockerfile": "Dockerfile"}}"#);
        std::fs::write(tmp.path().join("Dockerfile"), "FROM alpine:3.19\n").unwrap();
        let ctx = CommandContext::load(Some(tmp.path())).unwrap();
        assert!(!ctx.hashes.dockerfile.is_empty());

        // Changing the Dockerfile changes only the dockerfile/overall hashes.
        std::fs::write(tmp.path().join("Dockerfile"), "FROM alpine:3.20\n").unwrap();
        let ctx2 = CommandContext::load(Some(tmp.path())).unwrap();
        assert_eq!(ctx.hashes.config, ctx2.hashes.config);
        assert_ne!(ctx.hashes.dockerfile, ctx2.hashes.dockerfile);
        assert_ne!(ctx.hashes.overall, ctx2.hashes.overall);
    }

    #[test]
    fn label_set_carries_the_config_hash() {
        let tmp = seed_workspace(r#"{"image": "alpine"}"#);
        let ctx = CommandContext::load(Some(tmp.path())).unwrap();
        let labels = ctx.label_set(BuildMethod::Image, "");
        assert_eq!(labels.hash_config, ctx.hashes.config);
        assert!(labels.primary);
    }

    #[test]
    fn substitution_applies_to_env_values() {
        let tmp = seed_workspace(
            r#"{"image": "alpine", "remoteEnv": {"WS": "${containerWorkspaceFolder}"}}"#,
        );
        let ctx = CommandContext::load(Some(tmp.path())).unwrap();
        let ws = ctx.config.remote_env.get("WS").unwrap();
        assert!(ws.starts_with("/workspaces/"));
    }
}
