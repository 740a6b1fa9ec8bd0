//! `dcx ssh`: the SSH bridge.
//!
//! `--stdio <container>` is the ProxyCommand leg: it execs the in-container
//! stdio SSH server and pipes this process's stdin/stdout. Because the ssh
//! client runs it from an arbitrary directory, this mode works without a
//! resolvable workspace (the container name is the whole address). `--connect`
//! (and the bare command) print the client configuration for the workspace.

use anyhow::Result;
use dcx_core::engine::Engine;
use dcx_core::runtime_opts::container_workspace_folder;
use dcx_core::ssh::{run_stdio_proxy, ssh_config_stanza};
use std::path::Path;

use super::context::CommandContext;
use super::exec::require_running;

pub async fn execute(
    workspace: Option<&Path>,
    stdio: Option<&str>,
    _connect: bool,
) -> Result<i32> {
    if let Some(container_name) = stdio {
        // ProxyCommand mode: stdin/stdout carry the SSH protocol. The
        // workspace configuration refines user/workdir when resolvable, but
        // the container name alone is enough to serve the session.
        let (engine, user, workdir) = match CommandContext::load(workspace) {
            Ok(ctx) => (
                ctx.engine.clone(),
                ctx.config.effective_user().map(str::to_string),
                Some(container_workspace_folder(&ctx.config, &ctx.identity)),
            ),
            Err(_) => (Engine::detect(), None, None),
        };
        let code =
            run_stdio_proxy(&engine, container_name, user.as_deref(), workdir.as_deref()).await?;
        return Ok(code);
    }

    // Configuration mode: require the container so the printed alias works.
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await?;
    let _ = require_running(&observation)?;
    println!("{}", ssh_config_stanza(&ctx.identity));
    println!(
        "# Append to ~/.ssh/config, then connect with: ssh {}",
        ctx.identity.ssh_host()
    );
    Ok(0)
}
