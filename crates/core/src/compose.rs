//! Compose-composition integration
//!
//! Multi-service configurations are delegated to the external compose tool
//! (`docker compose`). dcx contributes a generated override file that stamps
//! the managed label set onto the services, so the state manager can find
//! compose-managed containers the same way it finds single containers.

use crate::config::{BuildPlan, DcxConfig};
use crate::engine::Engine;
use crate::errors::{ConfigError, DcxError, EngineError, Result};
use crate::identity::WorkspaceIdentity;
use crate::labels::LabelSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

/// A resolved compose plan for a workspace
#[derive(Debug, Clone)]
pub struct ComposeProject {
    /// Compose project name (sanitized workspace name or id)
    pub name: String,
    /// Directory compose commands run in
    pub base_path: PathBuf,
    /// Compose files, in declaration order
    pub files: Vec<PathBuf>,
    /// The primary service
    pub service: String,
    /// Additional services to run
    pub run_services: Vec<String>,
}

impl ComposeProject {
    /// Build the project from a compose-based configuration.
    pub fn from_config(config: &DcxConfig, identity: &WorkspaceIdentity) -> Result<Self> {
        let BuildPlan::Compose {
            files,
            service,
            run_services,
        } = config.build_plan()?
        else {
            return Err(DcxError::Config(ConfigError::Validation {
                message: "configuration is not compose-based".to_string(),
            }));
        };
        Ok(ComposeProject {
            name: format!("dcx-{}", identity.display_name()),
            base_path: identity.workspace_path.clone(),
            files: files.iter().map(|f| identity.workspace_path.join(f)).collect(),
            service,
            run_services,
        })
    }

    /// Read the referenced compose files for hashing, with their relative
    /// declaration paths.
    pub fn read_files(&self) -> Result<Vec<(String, String)>> {
        let mut out = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let contents = std::fs::read_to_string(file).map_err(DcxError::Io)?;
            let rel = file
                .strip_prefix(&self.base_path)
                .unwrap_or(file)
                .display()
                .to_string();
            out.push((rel, contents));
        }
        Ok(out)
    }

    /// Write the label-injecting override file into `dir`; returns its path.
    ///
    /// The primary service gets the full label set with `primary=true`; the
    /// run services get the same set with `primary=false`.
    pub fn write_override_file(&self, dir: &Path, labels: &LabelSet) -> Result<PathBuf> {
        let mut yaml = String::from("services:\n");
        let mut emit = |service: &str, primary: bool| {
            let mut set = labels.clone();
            set.primary = primary;
            yaml.push_str(&format!("  {}:\n    labels:\n", service));
            let mut pairs: Vec<(String, String)> = set.to_map().into_iter().collect();
            pairs.sort();
            for (key, value) in pairs {
                yaml.push_str(&format!("      {}: \"{}\"\n", key, value));
            }
        };
        emit(&self.service, true);
        for service in &self.run_services {
            if service != &self.service {
                emit(service, false);
            }
        }

        let path = dir.join("dcx-compose-override.yml");
        std::fs::write(&path, yaml).map_err(DcxError::Io)?;
        Ok(path)
    }

    /// Services passed to `up`/`start`: the primary plus runServices.
    pub fn all_services(&self) -> Vec<String> {
        let mut services = vec![self.service.clone()];
        for service in &self.run_services {
            if !services.contains(service) {
                services.push(service.clone());
            }
        }
        services
    }
}

/// Drives the external compose tool
pub struct ComposeRunner<'a> {
    engine: &'a Engine,
}

impl<'a> ComposeRunner<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    fn base_args(&self, project: &ComposeProject, extra_files: &[PathBuf]) -> Vec<String> {
        let mut args = vec!["compose".to_string(), "-p".to_string(), project.name.clone()];
        for file in project.files.iter().chain(extra_files) {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        args
    }

    async fn run(&self, project: &ComposeProject, args: Vec<String>) -> Result<()> {
        debug!(project = %project.name, args = ?args, "Running compose");
        let status = Command::new(self.engine.binary())
            .args(&args)
            .current_dir(&project.base_path)
            .status()
            .await
            .map_err(|e| {
                DcxError::Engine(EngineError::Unreachable {
                    message: e.to_string(),
                })
            })?;
        if !status.success() {
            return Err(DcxError::Engine(EngineError::CommandFailed {
                command: format!("{} {}", self.engine.binary(), args.join(" ")),
                stderr: format!("exit code {}", crate::engine::exit_code(&status)),
            }));
        }
        Ok(())
    }

    /// `compose up -d` for the primary and run services.
    #[instrument(skip_all, fields(project = %project.name))]
    pub async fn up(
        &self,
        project: &ComposeProject,
        override_file: &Path,
        build: bool,
    ) -> Result<()> {
        let mut args = self.base_args(project, &[override_file.to_path_buf()]);
        args.push("up".to_string());
        args.push("-d".to_string());
        if build {
            args.push("--build".to_string());
        }
        args.extend(project.all_services());
        self.run(project, args).await
    }

    pub async fn start(&self, project: &ComposeProject) -> Result<()> {
        let mut args = self.base_args(project, &[]);
        args.push("start".to_string());
        self.run(project, args).await
    }

    pub async fn stop(&self, project: &ComposeProject) -> Result<()> {
        let mut args = self.base_args(project, &[]);
        args.push("stop".to_string());
        self.run(project, args).await
    }

    /// `compose down`, optionally removing volumes and orphans.
    pub async fn down(
        &self,
        project: &ComposeProject,
        volumes: bool,
        remove_orphans: bool,
    ) -> Result<()> {
        let mut args = self.base_args(project, &[]);
        args.push("down".to_string());
        if volumes {
            args.push("--volumes".to_string());
        }
        if remove_orphans {
            args.push("--remove-orphans".to_string());
        }
        self.run(project, args).await
    }

    /// Container id of one service, when it exists.
    pub async fn service_container_id(
        &self,
        project: &ComposeProject,
        service: &str,
    ) -> Result<Option<String>> {
        let mut args = self.base_args(project, &[]);
        args.push("ps".to_string());
        args.push("-q".to_string());
        args.push(service.to_string());

        let output = Command::new(self.engine.binary())
            .args(&args)
            .current_dir(&project.base_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DcxError::Engine(EngineError::Unreachable {
                    message: e.to_string(),
                })
            })?;
        if !output.status.success() {
            return Ok(None);
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StringOrList;
    use crate::labels::BuildMethod;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, DcxConfig, WorkspaceIdentity) {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("compose.yml"), "services:\n  dev: {}\n").unwrap();
        let identity = WorkspaceIdentity::derive(tmp.path(), Some("web")).unwrap();
        let config = DcxConfig {
            docker_compose_file: Some(StringOrList::One("compose.yml".into())),
            service: Some("dev".into()),
            run_services: vec!["db".into()],
            ..Default::default()
        };
        (tmp, config, identity)
    }

    fn labels(identity: &WorkspaceIdentity, project: &str) -> LabelSet {
        LabelSet {
            workspace_id: identity.workspace_id.clone(),
            workspace_name: identity.project_name.clone().unwrap_or_default(),
            workspace_path: identity.workspace_path.display().to_string(),
            workspace_root_hash: identity.root_hash(),
            primary: true,
            build_method: BuildMethod::Compose,
            compose_project: project.to_string(),
            hash_config: "h".repeat(64),
            hash_overall: String::new(),
        }
    }

    #[test]
    fn project_resolves_files_relative_to_workspace() {
        let (_tmp, config, identity) = fixture();
        let project = ComposeProject::from_config(&config, &identity).unwrap();
        assert_eq!(project.name, "dcx-web");
        assert_eq!(project.service, "dev");
        assert!(project.files[0].ends_with("compose.yml"));
        assert_eq!(project.all_services(), vec!["dev", "db"]);
    }

    #[test]
    fn read_files_keeps_declaration_order_and_relative_paths() {
        let (tmp, mut config, identity) = fixture();
        std::fs::write(tmp.path().join("extra.yml"), "services: {}\n").unwrap();
        config.docker_compose_file = Some(StringOrList::Many(vec![
            "compose.yml".into(),
            "extra.yml".into(),
        ]));
        let project = ComposeProject::from_config(&config, &identity).unwrap();
        let files = project.read_files().unwrap();
        assert_eq!(files[0].0, "compose.yml");
        assert_eq!(files[1].0, "extra.yml");
    }

    #[test]
    fn override_file_marks_only_primary_service() {
        let (tmp, config, identity) = fixture();
        let project = ComposeProject::from_config(&config, &identity).unwrap();
        let path = project
            .write_override_file(tmp.path(), &labels(&identity, &project.name))
            .unwrap();
        let yaml = std::fs::read_to_string(path).unwrap();
        let dev_section = yaml.split("  db:").next().unwrap();
        assert!(dev_section.contains("io.dcx.primary: \"true\""));
        let db_section = yaml.split("  db:").nth(1).unwrap();
        assert!(db_section.contains("io.dcx.primary: \"false\""));
    }
}
