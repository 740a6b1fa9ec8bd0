//! `dcx run`: expand a sidecar shortcut, then exec it.

use anyhow::{bail, Result};
use dcx_core::exec::{exec_in_container, ExecRequest};
use std::path::Path;

use super::context::CommandContext;
use super::exec::require_running;

pub async fn execute(workspace: Option<&Path>, shortcut: &str, args: &[String]) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let Some(sidecar) = &ctx.sidecar else {
        bail!(
            "no sidecar document with shortcuts found next to {}",
            ctx.config_path.display()
        );
    };
    let argv = sidecar.resolve_shortcut(shortcut, args)?;

    let observation = ctx.observe().await?;
    let container = require_running(&observation)?;
    let request = ExecRequest {
        no_agent: ctx.default_no_agent(),
        ..Default::default()
    };
    let code = exec_in_container(
        &ctx.engine,
        &ctx.config,
        &ctx.identity,
        &container,
        &argv,
        &request,
    )
    .await?;
    Ok(code)
}
