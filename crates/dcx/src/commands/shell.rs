//! `dcx shell`: interactive login shell in the running container.

use anyhow::Result;
use dcx_core::exec::{exec_in_container, login_shell_argv, ExecRequest};
use std::path::Path;

use super::context::CommandContext;
use super::exec::require_running;

pub async fn execute(workspace: Option<&Path>) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await?;
    let container = require_running(&observation)?;

    let request = ExecRequest {
        tty: Some(true),
        no_agent: ctx.default_no_agent(),
        ..Default::default()
    };
    let code = exec_in_container(
        &ctx.engine,
        &ctx.config,
        &ctx.identity,
        &container,
        &login_shell_argv(),
        &request,
    )
    .await?;
    Ok(code)
}
