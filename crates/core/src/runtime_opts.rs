//! Runtime-option synthesis
//!
//! Merges the declarative configuration, the parsed `runArgs` vector, and
//! feature-declared requirements into a single container-create request.
//! Later layers override earlier ones where they conflict; feature
//! requirements are additive only and can never drop capabilities requested
//! by configuration. Labels are computed last and applied.

use crate::config::{DcxConfig, ForwardPort};
use crate::features::FeatureRequirements;
use crate::identity::WorkspaceIdentity;
use crate::labels::LabelSet;
use crate::mount::Mount;
use crate::runargs::{parse_port_binding, parse_run_args, PortBinding};
use indexmap::IndexMap;
use tracing::warn;

/// Default parent directory for workspace mounts inside containers
pub const CONTAINER_WORKSPACE_ROOT: &str = "/workspaces";

/// Entrypoint stub keeping the container alive when `overrideCommand` is set
pub const SLEEP_ENTRYPOINT: [&str; 3] = ["/bin/sh", "-c", "while sleep 1000; do :; done"];

/// The synthesized container-create request
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub name: String,
    pub image: String,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub env: IndexMap<String, String>,
    pub mounts: Vec<Mount>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub privileged: bool,
    pub init: bool,
    pub network_mode: Option<String>,
    pub ipc_mode: Option<String>,
    pub pid_mode: Option<String>,
    pub devices: Vec<String>,
    pub extra_hosts: Vec<String>,
    /// target -> options
    pub tmpfs: IndexMap<String, String>,
    pub sysctls: IndexMap<String, String>,
    pub shm_size: Option<u64>,
    pub ports: Vec<PortBinding>,
    pub labels: IndexMap<String, String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
}

/// Resolve the in-container workspace folder for a configuration.
pub fn container_workspace_folder(config: &DcxConfig, identity: &WorkspaceIdentity) -> String {
    config
        .workspace_folder
        .clone()
        .unwrap_or_else(|| format!("{}/{}", CONTAINER_WORKSPACE_ROOT, identity.display_name()))
}

/// Merge all option sources into the concrete create request.
pub fn synthesize(
    config: &DcxConfig,
    identity: &WorkspaceIdentity,
    image: &str,
    requirements: &FeatureRequirements,
    labels: &LabelSet,
) -> RuntimeOptions {
    let mut opts = RuntimeOptions {
        name: identity.container_name(),
        image: image.to_string(),
        ..Default::default()
    };

    // Layer 2: declarative configuration.
    opts.user = config
        .container_user
        .clone()
        .or_else(|| config.remote_user.clone());
    let workspace_folder = container_workspace_folder(config, identity);
    opts.working_dir = Some(workspace_folder.clone());

    let workspace_mount = match &config.workspace_mount {
        Some(spec) => Mount::parse(spec),
        None => Some(Mount::bind(
            identity.workspace_path.display().to_string(),
            workspace_folder,
        )),
    };
    opts.mounts.extend(workspace_mount);
    opts.mounts.extend(Mount::parse_all(&config.mounts));

    for (key, value) in &config.container_env {
        opts.env.insert(key.clone(), value.clone());
    }

    opts.cap_add.extend(config.cap_add.iter().cloned());
    opts.security_opt.extend(config.security_opt.iter().cloned());
    opts.privileged = config.privileged.unwrap_or(false);
    opts.init = config.init.unwrap_or(false);

    for port in &config.forward_ports {
        let binding = match port {
            ForwardPort::Number(n) => parse_port_binding(&n.to_string()),
            ForwardPort::Spec(s) => parse_port_binding(s),
        };
        match binding {
            Some(b) => opts.ports.push(b),
            None => warn!(port = ?port, "Dropping malformed forwardPorts entry"),
        }
    }

    if let Some(entrypoint) = &config.entrypoint {
        match shell_words::split(entrypoint) {
            Ok(argv) => opts.entrypoint = argv,
            Err(e) => warn!(error = %e, "Dropping untokenizable entrypoint override"),
        }
    }

    // Layer 3: the parsed runArgs vector.
    let run_args = parse_run_args(&config.run_args);
    merge_vec(&mut opts.cap_add, run_args.cap_add);
    merge_vec(&mut opts.cap_drop, run_args.cap_drop);
    merge_vec(&mut opts.security_opt, run_args.security_opt);
    opts.privileged |= run_args.privileged;
    opts.init |= run_args.init;
    opts.shm_size = run_args.shm_size.or(opts.shm_size);
    merge_vec(&mut opts.devices, run_args.devices);
    merge_vec(&mut opts.extra_hosts, run_args.extra_hosts);
    opts.network_mode = run_args.network_mode.or(opts.network_mode);
    opts.ipc_mode = run_args.ipc_mode.or(opts.ipc_mode);
    opts.pid_mode = run_args.pid_mode.or(opts.pid_mode);
    opts.tmpfs.extend(run_args.tmpfs);
    opts.sysctls.extend(run_args.sysctls);
    opts.ports.extend(run_args.ports);

    // Layer 4: feature requirements, additive only.
    opts.mounts.extend(requirements.mounts.iter().cloned());
    merge_vec(&mut opts.cap_add, requirements.cap_add.clone());
    merge_vec(&mut opts.security_opt, requirements.security_opt.clone());
    opts.privileged |= requirements.privileged;
    opts.init |= requirements.init;

    // Keep the container alive independent of the image's default command.
    if config.override_command.unwrap_or(true) {
        opts.entrypoint = SLEEP_ENTRYPOINT.iter().map(|s| s.to_string()).collect();
        opts.cmd = Vec::new();
    }

    // Labels last.
    let mut label_pairs: Vec<(String, String)> = labels.to_map().into_iter().collect();
    label_pairs.sort();
    opts.labels = label_pairs.into_iter().collect();

    opts
}

fn merge_vec(dest: &mut Vec<String>, src: Vec<String>) {
    for item in src {
        if !dest.contains(&item) {
            dest.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::BuildMethod;
    use tempfile::TempDir;

    fn identity() -> (TempDir, WorkspaceIdentity) {
        let tmp = TempDir::new().unwrap();
        let id = WorkspaceIdentity::derive(tmp.path(), Some("demo")).unwrap();
        (tmp, id)
    }

    fn labels(identity: &WorkspaceIdentity) -> LabelSet {
        LabelSet {
            workspace_id: identity.workspace_id.clone(),
            workspace_name: identity.project_name.clone().unwrap_or_default(),
            workspace_path: identity.workspace_path.display().to_string(),
            workspace_root_hash: identity.root_hash(),
            primary: true,
            build_method: BuildMethod::Image,
            compose_project: String::new(),
            hash_config: "h".repeat(64),
            hash_overall: "h".repeat(64),
        }
    }

    #[test]
    fn empty_run_args_yields_config_plus_features_only() {
        let (_tmp, identity) = identity();
        let config = DcxConfig {
            image: Some("alpine:3.19".into()),
            cap_add: vec!["SYS_PTRACE".into()],
            ..Default::default()
        };
        let reqs = FeatureRequirements {
            cap_add: vec!["NET_ADMIN".into()],
            ..Default::default()
        };
        let opts = synthesize(&config, &identity, "alpine:3.19", &reqs, &labels(&identity));
        assert_eq!(opts.cap_add, vec!["SYS_PTRACE", "NET_ADMIN"]);
        assert!(opts.cap_drop.is_empty());
        assert!(!opts.privileged);
    }

    #[test]
    fn run_args_layer_on_top_of_config() {
        let (_tmp, identity) = identity();
        let config = DcxConfig {
            image: Some("alpine".into()),
            run_args: vec![
                "--cap-add=MKNOD".into(),
                "--network".into(),
                "host".into(),
                "--shm-size=1g".into(),
            ],
            ..Default::default()
        };
        let opts = synthesize(
            &config,
            &identity,
            "alpine",
            &FeatureRequirements::default(),
            &labels(&identity),
        );
        assert!(opts.cap_add.contains(&"MKNOD".to_string()));
        assert_eq!(opts.network_mode.as_deref(), Some("host"));
        assert_eq!(opts.shm_size, Some(1024 * 1024 * 1024));
    }

    #[test]
    fn features_cannot_drop_capabilities() {
        let (_tmp, identity) = identity();
        let config = DcxConfig {
            image: Some("alpine".into()),
            cap_add: vec!["SYS_ADMIN".into()],
            ..Default::default()
        };
        let reqs = FeatureRequirements {
            privileged: true,
            init: true,
            ..Default::default()
        };
        let opts = synthesize(&config, &identity, "alpine", &reqs, &labels(&identity));
        assert!(opts.cap_add.contains(&"SYS_ADMIN".to_string()));
        assert!(opts.privileged);
        assert!(opts.init);
    }

    #[test]
    fn override_command_installs_sleep_stub() {
        let (_tmp, identity) = identity();
        let config = DcxConfig {
            image: Some("alpine".into()),
            override_command: Some(true),
            ..Default::default()
        };
        let opts = synthesize(
            &config,
            &identity,
            "alpine",
            &FeatureRequirements::default(),
            &labels(&identity),
        );
        assert_eq!(opts.entrypoint[0], "/bin/sh");
        assert!(opts.entrypoint[2].contains("sleep"));
        assert!(opts.cmd.is_empty());
    }

    #[test]
    fn default_workspace_mount_and_workdir() {
        let (_tmp, identity) = identity();
        let config = DcxConfig {
            image: Some("alpine".into()),
            ..Default::default()
        };
        let opts = synthesize(
            &config,
            &identity,
            "alpine",
            &FeatureRequirements::default(),
            &labels(&identity),
        );
        assert_eq!(opts.working_dir.as_deref(), Some("/workspaces/demo"));
        let workspace_mount = &opts.mounts[0];
        assert_eq!(workspace_mount.target, "/workspaces/demo");
        assert_eq!(
            workspace_mount.source.as_deref(),
            Some(identity.workspace_path.display().to_string().as_str())
        );
    }

    #[test]
    fn labels_are_applied_last_and_complete() {
        let (_tmp, identity) = identity();
        let config = DcxConfig {
            image: Some("alpine".into()),
            ..Default::default()
        };
        let label_set = labels(&identity);
        let opts = synthesize(
            &config,
            &identity,
            "alpine",
            &FeatureRequirements::default(),
            &label_set,
        );
        assert_eq!(opts.labels.len(), label_set.to_map().len());
        assert_eq!(
            opts.labels.get(crate::labels::LABEL_MANAGED).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn forward_ports_both_forms() {
        let (_tmp, identity) = identity();
        let config = DcxConfig {
            image: Some("alpine".into()),
            forward_ports: vec![
                ForwardPort::Number(3000),
                ForwardPort::Spec("127.0.0.1:8080:80".into()),
            ],
            ..Default::default()
        };
        let opts = synthesize(
            &config,
            &identity,
            "alpine",
            &FeatureRequirements::default(),
            &labels(&identity),
        );
        assert_eq!(opts.ports.len(), 2);
        assert_eq!(opts.ports[0].container_port, 3000);
        assert_eq!(opts.ports[1].host_ip.as_deref(), Some("127.0.0.1"));
    }
}
