//! `dcx exec`: run a command in the running container.
//!
//! The exit code is the command's own exit code; agent forwarding is set up
//! per call unless disabled.

use anyhow::Result;
use dcx_core::errors::{DcxError, StateError};
use dcx_core::exec::{exec_in_container, ExecRequest};
use dcx_core::state::{ContainerState, Observation};
use std::path::Path;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>, argv: &[String], no_agent: bool) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await?;
    let container = require_running(&observation)?;

    let request = ExecRequest {
        no_agent: no_agent || ctx.default_no_agent(),
        ..Default::default()
    };
    let code = exec_in_container(
        &ctx.engine,
        &ctx.config,
        &ctx.identity,
        &container,
        argv,
        &request,
    )
    .await?;
    Ok(code)
}

/// Exec-style commands require a RUNNING container.
pub fn require_running(observation: &Observation) -> Result<String> {
    match observation.state {
        ContainerState::Running => Ok(observation
            .container
            .as_ref()
            .expect("running state implies a container")
            .id
            .clone()),
        ContainerState::Absent => Err(DcxError::State(StateError::NotCreated).into()),
        ContainerState::Created => Err(DcxError::State(StateError::NotRunning).into()),
        ContainerState::Stale => Err(DcxError::State(StateError::Stale).into()),
        ContainerState::Broken => Err(DcxError::State(StateError::Broken {
            message: observation
                .broken_reason
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        })
        .into()),
    }
}
