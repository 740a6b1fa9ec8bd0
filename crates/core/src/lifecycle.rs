//! Lifecycle hook orchestration
//!
//! Six declarative hooks run around container creation and start. Each value
//! is a string (run through a shell), a sequence (exec-style argv), or a
//! named sequence whose entries execute in configuration order — an
//! order-preserving map, never a hash map.
//!
//! | hook                 | placement | first create | subsequent starts |
//! |----------------------|-----------|--------------|-------------------|
//! | initializeCommand    | host      | yes          | -                 |
//! | onCreateCommand      | container | yes          | -                 |
//! | updateContentCommand | container | yes          | -                 |
//! | postCreateCommand    | container | yes          | -                 |
//! | postStartCommand     | container | yes          | yes               |
//! | postAttachCommand    | container | on attach    | on attach         |
//!
//! The create sequence is strict and fail-fast. A sentinel marker written
//! after the last create-time hook lets the next `up` detect a partially
//! initialized container and re-run the create hooks.

use crate::config::DcxConfig;
use crate::engine::{Engine, EngineExecOptions};
use crate::errors::{ConfigError, DcxError, LifecycleError, Result};
use indexmap::IndexMap;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Marker written in-container after the create-time hooks complete
pub const POST_CREATE_SENTINEL: &str = "/tmp/.dcx-postcreate-done";

/// The six hook phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Initialize,
    OnCreate,
    UpdateContent,
    PostCreate,
    PostStart,
    PostAttach,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Initialize => "initializeCommand",
            LifecyclePhase::OnCreate => "onCreateCommand",
            LifecyclePhase::UpdateContent => "updateContentCommand",
            LifecyclePhase::PostCreate => "postCreateCommand",
            LifecyclePhase::PostStart => "postStartCommand",
            LifecyclePhase::PostAttach => "postAttachCommand",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed hook value preserving its format semantics
#[derive(Debug, Clone, PartialEq)]
pub enum CommandSpec {
    /// Shell-interpreted string (`/bin/sh -c` in container, `sh -c` on host)
    Shell(String),
    /// Exec-style argv, no shell interpretation
    Exec(Vec<String>),
    /// Named entries executing sequentially in configuration order
    Named(IndexMap<String, CommandSpec>),
}

impl CommandSpec {
    /// Parse a raw JSON hook value. `None` for null or empty values.
    pub fn from_json(value: &serde_json::Value) -> Result<Option<Self>> {
        let spec = match value {
            serde_json::Value::Null => return Ok(None),
            serde_json::Value::String(s) if s.is_empty() => return Ok(None),
            serde_json::Value::String(s) => CommandSpec::Shell(s.clone()),
            serde_json::Value::Array(items) => {
                let mut argv = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        serde_json::Value::String(s) => argv.push(s.clone()),
                        other => {
                            return Err(DcxError::Config(ConfigError::Validation {
                                message: format!(
                                    "lifecycle command arrays must contain strings, got {}",
                                    json_type(other)
                                ),
                            }))
                        }
                    }
                }
                if argv.is_empty() {
                    return Ok(None);
                }
                CommandSpec::Exec(argv)
            }
            serde_json::Value::Object(map) => {
                let mut named = IndexMap::with_capacity(map.len());
                for (name, entry) in map {
                    match Self::from_json(entry)? {
                        Some(nested @ (CommandSpec::Shell(_) | CommandSpec::Exec(_))) => {
                            named.insert(name.clone(), nested);
                        }
                        Some(CommandSpec::Named(_)) => {
                            return Err(DcxError::Config(ConfigError::Validation {
                                message: format!(
                                    "lifecycle command entry '{}' nests another named sequence",
                                    name
                                ),
                            }))
                        }
                        None => {
                            warn!(entry = %name, "Skipping empty lifecycle command entry");
                        }
                    }
                }
                if named.is_empty() {
                    return Ok(None);
                }
                CommandSpec::Named(named)
            }
            other => {
                return Err(DcxError::Config(ConfigError::Validation {
                    message: format!(
                        "lifecycle command must be a string, array, or object, got {}",
                        json_type(other)
                    ),
                }))
            }
        };
        Ok(Some(spec))
    }

    /// Human-readable form for error messages.
    pub fn describe(&self) -> String {
        match self {
            CommandSpec::Shell(s) => s.clone(),
            CommandSpec::Exec(argv) => argv.join(" "),
            CommandSpec::Named(map) => map
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// The configuration's hooks, parsed once
#[derive(Debug, Clone, Default)]
pub struct LifecycleHooks {
    pub initialize: Option<CommandSpec>,
    pub on_create: Option<CommandSpec>,
    pub update_content: Option<CommandSpec>,
    pub post_create: Option<CommandSpec>,
    pub post_start: Option<CommandSpec>,
    pub post_attach: Option<CommandSpec>,
}

impl LifecycleHooks {
    pub fn from_config(config: &DcxConfig) -> Result<Self> {
        let parse = |value: &Option<serde_json::Value>| -> Result<Option<CommandSpec>> {
            match value {
                Some(v) => CommandSpec::from_json(v),
                None => Ok(None),
            }
        };
        Ok(Self {
            initialize: parse(&config.initialize_command)?,
            on_create: parse(&config.on_create_command)?,
            update_content: parse(&config.update_content_command)?,
            post_create: parse(&config.post_create_command)?,
            post_start: parse(&config.post_start_command)?,
            post_attach: parse(&config.post_attach_command)?,
        })
    }
}

/// Where and as whom container-side hooks run
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    pub container_id: String,
    /// Resolved container workspace folder (working directory for hooks)
    pub workspace_folder: String,
    /// Resolved remote user, after variable substitution
    pub remote_user: Option<String>,
    /// Extra environment for container hooks (remoteEnv, agent socket, ...)
    pub env: Vec<(String, String)>,
    /// Host workspace root (working directory for initializeCommand)
    pub host_workspace: std::path::PathBuf,
}

impl LifecycleContext {
    fn exec_options(&self) -> EngineExecOptions {
        let mut env = vec![];
        let user = self.remote_user.clone().unwrap_or_default();
        if !user.is_empty() {
            env.push(("USER".to_string(), user.clone()));
            let home = if user == "root" {
                "/root".to_string()
            } else {
                format!("/home/{}", user)
            };
            env.push(("HOME".to_string(), home));
        }
        env.extend(self.env.iter().cloned());
        EngineExecOptions {
            user: self.remote_user.clone(),
            working_dir: Some(self.workspace_folder.clone()),
            env,
            tty: false,
            interactive: false,
        }
    }
}

/// Runs hook phases against a single container
pub struct LifecycleRunner<'a> {
    engine: &'a Engine,
}

impl<'a> LifecycleRunner<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Run the full create sequence: initialize on the host, then onCreate,
    /// updateContent, and postCreate in the container, then the sentinel.
    #[instrument(skip_all)]
    pub async fn run_create_sequence(
        &self,
        hooks: &LifecycleHooks,
        ctx: &LifecycleContext,
    ) -> Result<()> {
        self.run_host_phase(LifecyclePhase::Initialize, &hooks.initialize, ctx)
            .await?;
        self.run_container_phase(LifecyclePhase::OnCreate, &hooks.on_create, ctx)
            .await?;
        self.run_container_phase(LifecyclePhase::UpdateContent, &hooks.update_content, ctx)
            .await?;
        self.run_container_phase(LifecyclePhase::PostCreate, &hooks.post_create, ctx)
            .await?;
        self.write_sentinel(ctx).await?;
        self.run_container_phase(LifecyclePhase::PostStart, &hooks.post_start, ctx)
            .await
    }

    /// Run only the host-side initialize hook. Compose plans run this before
    /// invoking the composition tool, then the container phases afterwards.
    pub async fn run_initialize(
        &self,
        hooks: &LifecycleHooks,
        ctx: &LifecycleContext,
    ) -> Result<()> {
        self.run_host_phase(LifecyclePhase::Initialize, &hooks.initialize, ctx)
            .await
    }

    /// Run the subsequent-start sequence (postStart only).
    #[instrument(skip_all)]
    pub async fn run_start_sequence(
        &self,
        hooks: &LifecycleHooks,
        ctx: &LifecycleContext,
    ) -> Result<()> {
        self.run_container_phase(LifecyclePhase::PostStart, &hooks.post_start, ctx)
            .await
    }

    /// Run the attach hook.
    pub async fn run_attach(&self, hooks: &LifecycleHooks, ctx: &LifecycleContext) -> Result<()> {
        self.run_container_phase(LifecyclePhase::PostAttach, &hooks.post_attach, ctx)
            .await
    }

    /// Whether the create sequence previously completed in this container.
    pub async fn sentinel_present(&self, container_id: &str) -> Result<bool> {
        let result = self
            .engine
            .exec_capture(
                container_id,
                &["test".to_string(), "-f".to_string(), POST_CREATE_SENTINEL.to_string()],
                &EngineExecOptions::default(),
            )
            .await?;
        Ok(result.exit_code == 0)
    }

    async fn write_sentinel(&self, ctx: &LifecycleContext) -> Result<()> {
        let result = self
            .engine
            .exec_capture(
                &ctx.container_id,
                &[
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("touch {}", POST_CREATE_SENTINEL),
                ],
                &EngineExecOptions::default(),
            )
            .await?;
        if result.exit_code != 0 {
            warn!("Could not write post-create sentinel");
        }
        Ok(())
    }

    async fn run_host_phase(
        &self,
        phase: LifecyclePhase,
        spec: &Option<CommandSpec>,
        ctx: &LifecycleContext,
    ) -> Result<()> {
        let Some(spec) = spec else { return Ok(()) };
        info!(phase = %phase, "Running host hook");
        self.run_host_spec(phase, spec, ctx).await
    }

    fn run_host_spec<'b>(
        &'b self,
        phase: LifecyclePhase,
        spec: &'b CommandSpec,
        ctx: &'b LifecycleContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'b>> {
        Box::pin(async move {
            match spec {
                CommandSpec::Shell(command) => {
                    let status = tokio::process::Command::new("sh")
                        .arg("-c")
                        .arg(command)
                        .current_dir(&ctx.host_workspace)
                        .status()
                        .await
                        .map_err(|e| spawn_failed(phase, command, e))?;
                    check_status(phase, command, crate::engine::exit_code(&status))
                }
                CommandSpec::Exec(argv) => {
                    let (program, rest) = argv.split_first().ok_or_else(|| {
                        DcxError::internal("empty exec argv survived parsing")
                    })?;
                    let status = tokio::process::Command::new(program)
                        .args(rest)
                        .current_dir(&ctx.host_workspace)
                        .status()
                        .await
                        .map_err(|e| spawn_failed(phase, &argv.join(" "), e))?;
                    check_status(phase, &argv.join(" "), crate::engine::exit_code(&status))
                }
                CommandSpec::Named(entries) => {
                    for (name, entry) in entries {
                        debug!(phase = %phase, entry = %name, "Running named host hook entry");
                        self.run_host_spec(phase, entry, ctx).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    async fn run_container_phase(
        &self,
        phase: LifecyclePhase,
        spec: &Option<CommandSpec>,
        ctx: &LifecycleContext,
    ) -> Result<()> {
        let Some(spec) = spec else { return Ok(()) };
        info!(phase = %phase, container = %ctx.container_id, "Running container hook");
        self.run_container_spec(phase, spec, ctx).await
    }

    fn run_container_spec<'b>(
        &'b self,
        phase: LifecyclePhase,
        spec: &'b CommandSpec,
        ctx: &'b LifecycleContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'b>> {
        Box::pin(async move {
            match spec {
                CommandSpec::Shell(command) => {
                    let argv = vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()];
                    let code = self
                        .engine
                        .exec_streaming(&ctx.container_id, &argv, &ctx.exec_options())
                        .await?;
                    check_status(phase, command, code)
                }
                CommandSpec::Exec(argv) => {
                    let code = self
                        .engine
                        .exec_streaming(&ctx.container_id, argv, &ctx.exec_options())
                        .await?;
                    check_status(phase, &argv.join(" "), code)
                }
                CommandSpec::Named(entries) => {
                    for (name, entry) in entries {
                        debug!(phase = %phase, entry = %name, "Running named container hook entry");
                        self.run_container_spec(phase, entry, ctx).await?;
                    }
                    Ok(())
                }
            }
        })
    }
}

fn spawn_failed(phase: LifecyclePhase, command: &str, error: std::io::Error) -> DcxError {
    DcxError::Lifecycle(LifecycleError::SpawnFailed {
        phase: phase.as_str().to_string(),
        command: command.to_string(),
        message: error.to_string(),
    })
}

fn check_status(phase: LifecyclePhase, command: &str, exit_code: i32) -> Result<()> {
    if exit_code == 0 {
        Ok(())
    } else {
        Err(DcxError::Lifecycle(LifecycleError::HookFailed {
            phase: phase.as_str().to_string(),
            command: command.to_string(),
            exit_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_form_parses_as_shell() {
        let spec = CommandSpec::from_json(&json!("npm install")).unwrap().unwrap();
        assert_eq!(spec, CommandSpec::Shell("npm install".to_string()));
    }

    #[test]
    fn array_form_parses_as_exec() {
        let spec = CommandSpec::from_json(&json!(["npm", "install"]))
            .unwrap()
            .unwrap();
        assert_eq!(
            spec,
            CommandSpec::Exec(vec!["npm".to_string(), "install".to_string()])
        );
    }

    #[test]
    fn object_form_preserves_configuration_order() {
        let spec = CommandSpec::from_json(&json!({
            "zeta": "echo z",
            "alpha": ["echo", "a"],
        }))
        .unwrap()
        .unwrap();
        match spec {
            CommandSpec::Named(entries) => {
                let names: Vec<&str> = entries.keys().map(String::as_str).collect();
                assert_eq!(names, vec!["zeta", "alpha"]);
            }
            other => panic!("expected named sequence, got {:?}", other),
        }
    }

    #[test]
    fn empty_values_parse_to_none() {
        assert_eq!(CommandSpec::from_json(&json!(null)).unwrap(), None);
        assert_eq!(CommandSpec::from_json(&json!("")).unwrap(), None);
        assert_eq!(CommandSpec::from_json(&json!([])).unwrap(), None);
        assert_eq!(CommandSpec::from_json(&json!({})).unwrap(), None);
    }

    #[test]
    fn invalid_types_are_rejected() {
        assert!(CommandSpec::from_json(&json!(42)).is_err());
        assert!(CommandSpec::from_json(&json!(true)).is_err());
        assert!(CommandSpec::from_json(&json!(["ok", 1])).is_err());
        assert!(CommandSpec::from_json(&json!({"a": {"nested": "no"}})).is_err());
    }

    #[test]
    fn hooks_parse_from_config() {
        let config = DcxConfig {
            image: Some("alpine".into()),
            on_create_command: Some(json!("make setup")),
            post_start_command: Some(json!({"server": "make run", "watch": "make watch"})),
            ..Default::default()
        };
        let hooks = LifecycleHooks::from_config(&config).unwrap();
        assert!(matches!(hooks.on_create, Some(CommandSpec::Shell(_))));
        assert!(matches!(hooks.post_start, Some(CommandSpec::Named(_))));
        assert!(hooks.initialize.is_none());
    }

    #[test]
    fn exec_options_inject_user_and_home() {
        let ctx = LifecycleContext {
            container_id: "c".to_string(),
            workspace_folder: "/workspaces/app".to_string(),
            remote_user: Some("dev".to_string()),
            env: vec![("FOO".to_string(), "bar".to_string())],
            host_workspace: std::path::PathBuf::from("/tmp"),
        };
        let opts = ctx.exec_options();
        assert_eq!(opts.user.as_deref(), Some("dev"));
        assert_eq!(opts.working_dir.as_deref(), Some("/workspaces/app"));
        assert!(opts.env.contains(&("USER".to_string(), "dev".to_string())));
        assert!(opts
            .env
            .contains(&("HOME".to_string(), "/home/dev".to_string())));
        assert!(opts.env.contains(&("FOO".to_string(), "bar".to_string())));
    }

    #[tokio::test]
    async fn host_hook_failure_is_fail_fast_with_phase_and_code() {
        let engine = Engine::with_binary("docker");
        let runner = LifecycleRunner::new(&engine);
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = LifecycleContext {
            container_id: String::new(),
            workspace_folder: "/".to_string(),
            remote_user: None,
            env: vec![],
            host_workspace: tmp.path().to_path_buf(),
        };
        let hooks = LifecycleHooks {
            initialize: Some(CommandSpec::Shell("exit 3".to_string())),
            ..Default::default()
        };
        // Only the host-side phase runs before the failure aborts the rest.
        let err = runner.run_create_sequence(&hooks, &ctx).await.unwrap_err();
        match err {
            DcxError::Lifecycle(LifecycleError::HookFailed {
                phase, exit_code, ..
            }) => {
                assert_eq!(phase, "initializeCommand");
                assert_eq!(exit_code, 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn named_host_entries_run_in_order_and_stop_at_first_failure() {
        let engine = Engine::with_binary("docker");
        let runner = LifecycleRunner::new(&engine);
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = LifecycleContext {
            container_id: String::new(),
            workspace_folder: "/".to_string(),
            remote_user: None,
            env: vec![],
            host_workspace: tmp.path().to_path_buf(),
        };

        let mut entries = IndexMap::new();
        entries.insert(
            "first".to_string(),
            CommandSpec::Shell("touch first-ran".to_string()),
        );
        entries.insert("boom".to_string(), CommandSpec::Shell("exit 1".to_string()));
        entries.insert(
            "after".to_string(),
            CommandSpec::Shell("touch after-ran".to_string()),
        );
        let hooks = LifecycleHooks {
            initialize: Some(CommandSpec::Named(entries)),
            ..Default::default()
        };

        assert!(runner.run_create_sequence(&hooks, &ctx).await.is_err());
        assert!(tmp.path().join("first-ran").exists());
        assert!(!tmp.path().join("after-ran").exists());
    }
}
