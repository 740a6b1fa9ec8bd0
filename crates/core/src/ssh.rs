//! SSH bridge (host side)
//!
//! Containers are exposed as SSH endpoints through a stdio proxy: the ssh
//! client is configured with a `ProxyCommand` that runs `dcx ssh --stdio
//! <container>`, which execs the in-container helper's stdio SSH server and
//! pipes stdin/stdout. Trust is established by the ProxyCommand boundary,
//! not host keys, so clients disable host-key checking for these aliases.
//!
//! The helper binary is deployed lazily into the container on first use and
//! cached at a versioned path.

use crate::engine::{Engine, EngineExecOptions};
use crate::errors::{DcxError, Result};
use crate::identity::WorkspaceIdentity;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Helper version deployed into containers; tracks the CLI version
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Versioned in-container path the helper is cached at.
pub fn agent_container_path() -> String {
    format!("/tmp/dcx-agent-{}", AGENT_VERSION)
}

/// Ensure the helper binary exists in the container, deploying it via the
/// engine's file copy when missing. Returns the in-container path.
#[instrument(skip(engine), fields(container = %container_id))]
pub async fn ensure_agent_deployed(engine: &Engine, container_id: &str) -> Result<String> {
    let dest = agent_container_path();
    let probe = engine
        .exec_capture(
            container_id,
            &["test".to_string(), "-x".to_string(), dest.clone()],
            &EngineExecOptions::default(),
        )
        .await?;
    if probe.exit_code == 0 {
        debug!(path = %dest, "Agent helper already deployed");
        return Ok(dest);
    }

    let local = local_agent_binary()?;
    info!(path = %dest, "Deploying agent helper into container");
    engine.copy_into(container_id, &local, &dest).await?;
    let chmod = engine
        .exec_capture(
            container_id,
            &["chmod".to_string(), "755".to_string(), dest.clone()],
            &EngineExecOptions::default(),
        )
        .await?;
    if chmod.exit_code != 0 {
        return Err(DcxError::internal("could not mark agent helper executable"));
    }
    Ok(dest)
}

/// Locate the `dcx-agent` binary next to the running executable.
fn local_agent_binary() -> Result<PathBuf> {
    let current = std::env::current_exe().map_err(DcxError::Io)?;
    let dir = current
        .parent()
        .ok_or_else(|| DcxError::internal("executable has no parent directory"))?;
    let candidate = dir.join("dcx-agent");
    if candidate.is_file() {
        return Ok(candidate);
    }
    Err(DcxError::internal(format!(
        "dcx-agent binary not found at {}",
        candidate.display()
    )))
}

/// Run the stdio proxy leg: exec the in-container SSH server with this
/// process's stdin/stdout attached. Returns the server's exit code.
#[instrument(skip(engine))]
pub async fn run_stdio_proxy(
    engine: &Engine,
    container_id: &str,
    user: Option<&str>,
    workdir: Option<&str>,
) -> Result<i32> {
    let agent_path = ensure_agent_deployed(engine, container_id).await?;
    let mut argv = vec![agent_path, "ssh-stdio".to_string()];
    if let Some(user) = user {
        argv.push("--user".to_string());
        argv.push(user.to_string());
    }
    if let Some(workdir) = workdir {
        argv.push("--workdir".to_string());
        argv.push(workdir.to_string());
    }
    engine
        .exec_streaming(
            container_id,
            &argv,
            &EngineExecOptions {
                interactive: true,
                ..Default::default()
            },
        )
        .await
}

/// Render the ssh_config stanza for a workspace's host alias.
pub fn ssh_config_stanza(identity: &WorkspaceIdentity) -> String {
    format!(
        "Host {host}\n\
         \x20   ProxyCommand dcx ssh --stdio {container}\n\
         \x20   StrictHostKeyChecking no\n\
         \x20   UserKnownHostsFile /dev/null\n",
        host = identity.ssh_host(),
        container = identity.container_name(),
    )
}
