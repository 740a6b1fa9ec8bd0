//! Container engine client
//!
//! The engine is driven through its CLI (`docker` or `podman`), selected via
//! the `DCX_ENGINE` environment variable with docker as the default. The
//! engine's own environment handling (`DOCKER_HOST` and friends) applies
//! unchanged since commands inherit the process environment.

use crate::errors::{DcxError, EngineError, Result};
use crate::runtime_opts::RuntimeOptions;
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, instrument, warn};

/// Environment variable selecting the engine binary
pub const ENGINE_ENV: &str = "DCX_ENGINE";

/// A container as reported by `ps`
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Raw engine state string, e.g. "running" / "exited"
    pub state: String,
    /// Human status line, e.g. "Up 2 hours"
    pub status: String,
    pub labels: HashMap<String, String>,
    pub created_at: Option<DateTime<FixedOffset>>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Result of a captured exec
#[derive(Debug)]
pub struct CapturedExec {
    pub exit_code: i32,
    pub stdout: String,
}

/// Per-exec settings forwarded to the engine
#[derive(Debug, Clone, Default)]
pub struct EngineExecOptions {
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
    pub tty: bool,
    pub interactive: bool,
}

/// CLI-driven container engine client
#[derive(Debug, Clone)]
pub struct Engine {
    binary: String,
}

impl Engine {
    /// Select the engine binary from the environment, defaulting to docker.
    pub fn detect() -> Self {
        let binary = std::env::var(ENGINE_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "docker".to_string());
        Self { binary }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run an engine command capturing stdout; non-zero exit is an error.
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(binary = %self.binary, args = ?args, "Running engine command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DcxError::Engine(EngineError::NotInstalled),
                _ => DcxError::Engine(EngineError::Unreachable {
                    message: e.to_string(),
                }),
            })?;
        if !output.status.success() {
            return Err(DcxError::Engine(EngineError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run an engine command with inherited stdio so output streams
    /// unbuffered to the user (builds, logs).
    async fn run_streaming(&self, args: &[&str]) -> Result<i32> {
        debug!(binary = %self.binary, args = ?args, "Streaming engine command");
        let status = Command::new(&self.binary)
            .args(args)
            .status()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DcxError::Engine(EngineError::NotInstalled),
                _ => DcxError::Engine(EngineError::Unreachable {
                    message: e.to_string(),
                }),
            })?;
        Ok(exit_code(&status))
    }

    /// Health check: is the engine daemon reachable?
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<()> {
        self.run(&["info", "--format", "{{.ServerVersion}}"])
            .await
            .map(|_| ())
    }

    pub async fn version(&self) -> Result<String> {
        Ok(self
            .run(&["version", "--format", "{{.Server.Version}}"])
            .await?
            .trim()
            .to_string())
    }

    /// List containers matching every `key=value` label filter.
    #[instrument(skip(self))]
    pub async fn list_containers(
        &self,
        label_filters: &[(String, String)],
        all: bool,
    ) -> Result<Vec<ContainerSummary>> {
        let mut args: Vec<String> = vec!["ps".into(), "--no-trunc".into()];
        if all {
            args.push("-a".into());
        }
        for (key, value) in label_filters {
            args.push("--filter".into());
            args.push(format!("label={}={}", key, value));
        }
        args.push("--format".into());
        args.push("{{json .}}".into());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&arg_refs).await?;
        Ok(stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) => Some(parse_summary(&value)),
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable ps line");
                    None
                }
            })
            .collect())
    }

    /// Inspect a container; `None` when it does not exist.
    pub async fn inspect_container(&self, id: &str) -> Result<Option<serde_json::Value>> {
        match self.run(&["inspect", "--type", "container", id]).await {
            Ok(stdout) => {
                let parsed: Vec<serde_json::Value> = serde_json::from_str(&stdout)
                    .map_err(|e| DcxError::internal(format!("inspect output: {}", e)))?;
                Ok(parsed.into_iter().next())
            }
            Err(DcxError::Engine(EngineError::CommandFailed { stderr, .. }))
                if stderr.contains("No such") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn image_exists(&self, reference: &str) -> Result<bool> {
        match self.run(&["image", "inspect", "--format", "ok", reference]).await {
            Ok(_) => Ok(true),
            Err(DcxError::Engine(EngineError::CommandFailed { stderr, .. }))
                if stderr.contains("No such") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Read one label off an image, when both image and label exist.
    pub async fn image_label(&self, reference: &str, label: &str) -> Result<Option<String>> {
        let format = format!("{{{{index .Config.Labels \"{}\"}}}}", label);
        match self
            .run(&["image", "inspect", "--format", &format, reference])
            .await
        {
            Ok(stdout) => {
                let value = stdout.trim();
                if value.is_empty() || value == "<no value>" {
                    Ok(None)
                } else {
                    Ok(Some(value.to_string()))
                }
            }
            Err(DcxError::Engine(EngineError::CommandFailed { stderr, .. }))
                if stderr.contains("No such") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// List image references matching a repository prefix.
    pub async fn list_images(&self, repository_prefix: &str) -> Result<Vec<String>> {
        let stdout = self
            .run(&["images", "--format", "{{.Repository}}:{{.Tag}}"])
            .await?;
        Ok(stdout
            .lines()
            .filter(|line| line.starts_with(repository_prefix))
            .map(str::to_string)
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn pull(&self, image: &str) -> Result<()> {
        let code = self.run_streaming(&["pull", image]).await?;
        if code != 0 {
            return Err(DcxError::Engine(EngineError::Pull {
                image: image.to_string(),
                message: format!("exit code {}", code),
            }));
        }
        Ok(())
    }

    /// Build an image, streaming output to the user.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(tag = %tag))]
    pub async fn build(
        &self,
        context: &Path,
        dockerfile: &Path,
        tag: &str,
        build_args: &[(String, String)],
        target: Option<&str>,
        cache_from: &[String],
        pull: bool,
    ) -> Result<()> {
        let context_str = context.display().to_string();
        let dockerfile_str = dockerfile.display().to_string();
        let mut args: Vec<String> = vec![
            "build".into(),
            "-t".into(),
            tag.into(),
            "-f".into(),
            dockerfile_str,
        ];
        for (key, value) in build_args {
            args.push("--build-arg".into());
            args.push(format!("{}={}", key, value));
        }
        if let Some(target) = target {
            args.push("--target".into());
            args.push(target.into());
        }
        for cache in cache_from {
            args.push("--cache-from".into());
            args.push(cache.clone());
        }
        if pull {
            args.push("--pull".into());
        }
        args.push(context_str);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let code = self.run_streaming(&arg_refs).await?;
        if code != 0 {
            return Err(DcxError::Engine(EngineError::Build {
                message: format!("exit code {}", code),
            }));
        }
        Ok(())
    }

    /// Create a container from synthesized runtime options; returns the id.
    #[instrument(skip_all, fields(name = %opts.name, image = %opts.image))]
    pub async fn create(&self, opts: &RuntimeOptions) -> Result<String> {
        let args = create_args(opts);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&arg_refs).await?;
        Ok(stdout.trim().to_string())
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.run(&["start", id]).await.map(|_| ())
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.run(&["stop", id]).await.map(|_| ())
    }

    pub async fn remove(&self, id: &str, force: bool, volumes: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        if volumes {
            args.push("-v");
        }
        args.push(id);
        self.run(&args).await.map(|_| ())
    }

    pub async fn remove_image(&self, reference: &str) -> Result<()> {
        self.run(&["rmi", reference]).await.map(|_| ())
    }

    /// Exec with inherited stdio (interactive commands, lifecycle hooks).
    pub async fn exec_streaming(
        &self,
        container: &str,
        argv: &[String],
        options: &EngineExecOptions,
    ) -> Result<i32> {
        let args = exec_args(container, argv, options);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_streaming(&arg_refs).await
    }

    /// Exec capturing stdout (probes, markers).
    pub async fn exec_capture(
        &self,
        container: &str,
        argv: &[String],
        options: &EngineExecOptions,
    ) -> Result<CapturedExec> {
        let args = exec_args(container, argv, options);
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DcxError::Engine(EngineError::Unreachable {
                    message: e.to_string(),
                })
            })?;
        Ok(CapturedExec {
            exit_code: exit_code(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    /// Spawn an exec with piped stdin/stdout, for stdio tunnels.
    pub fn spawn_exec_piped(
        &self,
        container: &str,
        argv: &[String],
        options: &EngineExecOptions,
    ) -> Result<Child> {
        let args = exec_args(container, argv, options);
        Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DcxError::Engine(EngineError::Unreachable {
                    message: e.to_string(),
                })
            })
    }

    /// Copy a local file into a container.
    pub async fn copy_into(&self, container: &str, local: &Path, dest: &str) -> Result<()> {
        let source = local.display().to_string();
        let target = format!("{}:{}", container, dest);
        self.run(&["cp", &source, &target]).await.map(|_| ())
    }

    /// Stream container logs; returns the child exit code.
    pub async fn logs(
        &self,
        container: &str,
        follow: bool,
        tail: Option<u32>,
        timestamps: bool,
    ) -> Result<i32> {
        let mut args: Vec<String> = vec!["logs".into()];
        if follow {
            args.push("-f".into());
        }
        if let Some(tail) = tail {
            args.push("--tail".into());
            args.push(tail.to_string());
        }
        if timestamps {
            args.push("-t".into());
        }
        args.push(container.into());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_streaming(&arg_refs).await
    }
}

/// Map an exit status to a code, with signal deaths as 128+signum.
pub fn exit_code(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}

/// Render the `create` argument vector for synthesized runtime options.
fn create_args(opts: &RuntimeOptions) -> Vec<String> {
    let mut args: Vec<String> = vec!["create".into(), "--name".into(), opts.name.clone()];

    for (key, value) in &opts.labels {
        args.push("--label".into());
        args.push(format!("{}={}", key, value));
    }
    if let Some(user) = &opts.user {
        args.push("--user".into());
        args.push(user.clone());
    }
    if let Some(workdir) = &opts.working_dir {
        args.push("--workdir".into());
        args.push(workdir.clone());
    }
    for (key, value) in &opts.env {
        args.push("--env".into());
        args.push(format!("{}={}", key, value));
    }
    for mount in &opts.mounts {
        args.push("--mount".into());
        args.push(mount.to_engine_format());
    }
    for cap in &opts.cap_add {
        args.push("--cap-add".into());
        args.push(cap.clone());
    }
    for cap in &opts.cap_drop {
        args.push("--cap-drop".into());
        args.push(cap.clone());
    }
    for opt in &opts.security_opt {
        args.push("--security-opt".into());
        args.push(opt.clone());
    }
    if opts.privileged {
        args.push("--privileged".into());
    }
    if opts.init {
        args.push("--init".into());
    }
    if let Some(network) = &opts.network_mode {
        args.push("--network".into());
        args.push(network.clone());
    }
    if let Some(ipc) = &opts.ipc_mode {
        args.push("--ipc".into());
        args.push(ipc.clone());
    }
    if let Some(pid) = &opts.pid_mode {
        args.push("--pid".into());
        args.push(pid.clone());
    }
    for device in &opts.devices {
        args.push("--device".into());
        args.push(device.clone());
    }
    for host in &opts.extra_hosts {
        args.push("--add-host".into());
        args.push(host.clone());
    }
    for (target, tmpfs_opts) in &opts.tmpfs {
        args.push("--tmpfs".into());
        if tmpfs_opts.is_empty() {
            args.push(target.clone());
        } else {
            args.push(format!("{}:{}", target, tmpfs_opts));
        }
    }
    for (key, value) in &opts.sysctls {
        args.push("--sysctl".into());
        args.push(format!("{}={}", key, value));
    }
    if let Some(shm) = opts.shm_size {
        args.push("--shm-size".into());
        args.push(shm.to_string());
    }
    for port in &opts.ports {
        args.push("--publish".into());
        args.push(port.to_engine_format());
    }
    if let Some(first) = opts.entrypoint.first() {
        args.push("--entrypoint".into());
        args.push(first.clone());
    }

    args.push(opts.image.clone());
    // Entrypoint tail plus cmd become the container arguments.
    args.extend(opts.entrypoint.iter().skip(1).cloned());
    args.extend(opts.cmd.iter().cloned());
    args
}

/// Render the `exec` argument vector.
fn exec_args(container: &str, argv: &[String], options: &EngineExecOptions) -> Vec<String> {
    let mut args: Vec<String> = vec!["exec".into()];
    if options.interactive {
        args.push("-i".into());
    }
    if options.tty {
        args.push("-t".into());
    }
    if let Some(user) = &options.user {
        args.push("--user".into());
        args.push(user.clone());
    }
    if let Some(workdir) = &options.working_dir {
        args.push("--workdir".into());
        args.push(workdir.clone());
    }
    for (key, value) in &options.env {
        args.push("--env".into());
        args.push(format!("{}={}", key, value));
    }
    args.push(container.into());
    args.extend(argv.iter().cloned());
    args
}

/// Parse a `ps --format '{{json .}}'` line.
fn parse_summary(value: &serde_json::Value) -> ContainerSummary {
    let get = |key: &str| -> String {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let labels = get("Labels")
        .split(',')
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect();

    // Docker renders CreatedAt like "2024-05-01 10:00:00 +0000 UTC".
    let created_raw = get("CreatedAt");
    let created_at = DateTime::parse_from_str(
        created_raw.trim_end_matches(" UTC"),
        "%Y-%m-%d %H:%M:%S %z",
    )
    .ok();

    ContainerSummary {
        id: get("ID"),
        name: get("Names").split(',').next().unwrap_or_default().to_string(),
        image: get("Image"),
        state: get("State"),
        status: get("Status"),
        labels,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::Mount;

    #[test]
    fn exit_code_maps_signals() {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            let killed = std::process::ExitStatus::from_raw(9); // SIGKILL
            assert_eq!(exit_code(&killed), 137);
            let clean = std::process::ExitStatus::from_raw(0);
            assert_eq!(exit_code(&clean), 0);
        }
    }

    #[test]
    fn create_args_cover_all_option_groups() {
        let mut opts = RuntimeOptions {
            name: "dcx-demo".into(),
            image: "alpine:3.19".into(),
            user: Some("dev".into()),
            working_dir: Some("/workspaces/demo".into()),
            privileged: true,
            init: true,
            network_mode: Some("host".into()),
            shm_size: Some(1024),
            entrypoint: vec!["/bin/sh".into(), "-c".into(), "sleep inf".into()],
            ..Default::default()
        };
        opts.env.insert("FOO".into(), "bar".into());
        opts.mounts.push(Mount::bind("/src", "/work"));
        opts.cap_add.push("SYS_PTRACE".into());
        opts.tmpfs.insert("/scratch".into(), "size=64m".into());
        opts.labels.insert("io.dcx.managed".into(), "true".into());

        let args = create_args(&opts);
        let joined = args.join(" ");
        assert!(joined.starts_with("create --name dcx-demo"));
        assert!(joined.contains("--label io.dcx.managed=true"));
        assert!(joined.contains("--user dev"));
        assert!(joined.contains("--env FOO=bar"));
        assert!(joined.contains("--mount type=bind,source=/src,target=/work"));
        assert!(joined.contains("--cap-add SYS_PTRACE"));
        assert!(joined.contains("--privileged"));
        assert!(joined.contains("--init"));
        assert!(joined.contains("--network host"));
        assert!(joined.contains("--tmpfs /scratch:size=64m"));
        assert!(joined.contains("--shm-size 1024"));
        assert!(joined.contains("--entrypoint /bin/sh"));
        // Image comes before the entrypoint tail.
        let image_pos = args.iter().position(|a| a == "alpine:3.19").unwrap();
        assert_eq!(args[image_pos + 1], "-c");
        assert_eq!(args[image_pos + 2], "sleep inf");
    }

    #[test]
    fn exec_args_wire_tty_and_env() {
        let options = EngineExecOptions {
            user: Some("dev".into()),
            working_dir: Some("/work".into()),
            env: vec![("TERM".into(), "xterm".into())],
            tty: true,
            interactive: true,
        };
        let args = exec_args("box", &["env".to_string()], &options);
        let joined = args.join(" ");
        assert!(joined.starts_with("exec -i -t --user dev --workdir /work --env TERM=xterm box env"));
    }

    #[test]
    fn ps_line_parses_labels_and_state() {
        let line = serde_json::json!({
            "ID": "abc123",
            "Names": "dcx-demo",
            "Image": "alpine:3.19",
            "State": "running",
            "Status": "Up 5 minutes",
            "Labels": "io.dcx.managed=true,io.dcx.workspace-id=0123",
            "CreatedAt": "2026-05-01 10:00:00 +0000 UTC"
        });
        let summary = parse_summary(&line);
        assert_eq!(summary.id, "abc123");
        assert!(summary.is_running());
        assert_eq!(
            summary.labels.get("io.dcx.managed").map(String::as_str),
            Some("true")
        );
        assert!(summary.created_at.is_some());
    }
}
