//! Ad-hoc command execution in containers
//!
//! Builds the engine-exec request from the configuration (user, working
//! directory, `remoteEnv`), the session (TTY detection, locale passthrough),
//! and any ad-hoc environment from the caller, with optional per-session
//! agent forwarding.

use crate::agent::{host_agent_available, AgentForwardSession, SSH_AUTH_SOCK};
use crate::config::DcxConfig;
use crate::engine::{Engine, EngineExecOptions};
use crate::errors::Result;
use crate::identity::WorkspaceIdentity;
use crate::runtime_opts::container_workspace_folder;
use std::io::IsTerminal;
use tracing::{debug, instrument, warn};

/// Caller knobs for one exec
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    /// Force TTY on/off; `None` detects from the session
    pub tty: Option<bool>,
    /// Extra environment on top of `remoteEnv`
    pub env: Vec<(String, String)>,
    /// Disable agent forwarding for this call
    pub no_agent: bool,
    /// Run as a different user than the configured one
    pub user: Option<String>,
}

/// Assemble engine exec options for a session.
pub fn build_exec_options(
    config: &DcxConfig,
    identity: &WorkspaceIdentity,
    request: &ExecRequest,
) -> EngineExecOptions {
    let tty = request
        .tty
        .unwrap_or_else(|| std::io::stdin().is_terminal() && std::io::stdout().is_terminal());

    let user = request
        .user
        .clone()
        .or_else(|| config.effective_user().map(str::to_string));

    let mut env: Vec<(String, String)> = Vec::new();
    if let Some(user) = &user {
        env.push(("USER".to_string(), user.clone()));
        let home = if user == "root" {
            "/root".to_string()
        } else {
            format!("/home/{}", user)
        };
        env.push(("HOME".to_string(), home));
    }

    // Session environment from configuration.
    for (key, value) in &config.remote_env {
        env.push((key.clone(), value.clone()));
    }

    // Terminal apps need the host's locale and terminal type.
    if tty {
        for (key, value) in std::env::vars() {
            if key == "TERM" || key == "LANG" || key.starts_with("LC_") {
                env.push((key, value));
            }
        }
    }

    env.extend(request.env.iter().cloned());

    EngineExecOptions {
        user,
        working_dir: Some(container_workspace_folder(config, identity)),
        env,
        tty,
        interactive: true,
    }
}

/// Run a command in a running container, with agent forwarding when the host
/// exports an agent socket and the caller has not disabled it. Returns the
/// command's own exit code.
#[instrument(skip_all, fields(container = %container_id))]
pub async fn exec_in_container(
    engine: &Engine,
    config: &DcxConfig,
    identity: &WorkspaceIdentity,
    container_id: &str,
    argv: &[String],
    request: &ExecRequest,
) -> Result<i32> {
    let mut options = build_exec_options(config, identity, request);

    let forwarding = if request.no_agent || !host_agent_available() {
        debug!("Agent forwarding disabled or unavailable");
        None
    } else {
        match AgentForwardSession::establish(engine, container_id, options.user.as_deref()).await {
            Ok(session) => {
                options.env.push((
                    SSH_AUTH_SOCK.to_string(),
                    session.container_socket().to_string(),
                ));
                Some(session)
            }
            Err(e) => {
                // Forwarding is best-effort: the exec proceeds without it.
                warn!(error = %e, "Agent forwarding unavailable, continuing without it");
                None
            }
        }
    };

    let result = engine.exec_streaming(container_id, argv, &options).await;

    if let Some(session) = forwarding {
        session.teardown().await;
    }

    result
}

/// Argv for an interactive login shell as the configured user.
pub fn login_shell_argv() -> Vec<String> {
    vec!["/bin/sh".to_string(), "-l".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, DcxConfig, WorkspaceIdentity) {
        let tmp = TempDir::new().unwrap();
        let identity = WorkspaceIdentity::derive(tmp.path(), Some("app")).unwrap();
        let mut config = DcxConfig {
            image: Some("alpine".into()),
            remote_user: Some("dev".into()),
            ..Default::default()
        };
        config
            .remote_env
            .insert("FOO".to_string(), "bar".to_string());
        (tmp, config, identity)
    }

    #[test]
    fn injects_user_home_and_remote_env() {
        let (_tmp, config, identity) = fixture();
        let options = build_exec_options(
            &config,
            &identity,
            &ExecRequest {
                tty: Some(false),
                ..Default::default()
            },
        );
        assert_eq!(options.user.as_deref(), Some("dev"));
        assert_eq!(options.working_dir.as_deref(), Some("/workspaces/app"));
        assert!(options.env.contains(&("USER".into(), "dev".into())));
        assert!(options.env.contains(&("HOME".into(), "/home/dev".into())));
        assert!(options.env.contains(&("FOO".into(), "bar".into())));
        assert!(!options.tty);
    }

    #[test]
    fn tty_sessions_pass_locale_through() {
        let (_tmp, config, identity) = fixture();
        std::env::set_var("TERM", "xterm-256color");
        let options = build_exec_options(
            &config,
            &identity,
            &ExecRequest {
                tty: Some(true),
                ..Default::default()
            },
        );
        assert!(options
            .env
            .iter()
            .any(|(k, v)| k == "TERM" && v == "xterm-256color"));
    }

    #[test]
    fn adhoc_env_overrides_come_last() {
        let (_tmp, config, identity) = fixture();
        let options = build_exec_options(
            &config,
            &identity,
            &ExecRequest {
                tty: Some(false),
                env: vec![("FOO".into(), "override".into())],
                ..Default::default()
            },
        );
        let last_foo = options
            .env
            .iter()
            .rev()
            .find(|(k, _)| k == "FOO")
            .map(|(_, v)| v.as_str());
        assert_eq!(last_foo, Some("override"));
    }

    #[test]
    fn caller_user_overrides_config_user() {
        let (_tmp, config, identity) = fixture();
        let options = build_exec_options(
            &config,
            &identity,
            &ExecRequest {
                tty: Some(false),
                user: Some("root".into()),
                ..Default::default()
            },
        );
        assert_eq!(options.user.as_deref(), Some("root"));
        assert!(options.env.contains(&("HOME".into(), "/root".into())));
    }
}
