//! `dcx debug`: dump identity, hashes, and observed state as JSON.

use anyhow::Result;
use serde_json::json;
use std::path::Path;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await.ok();

    let dump = json!({
        "workspace": ctx.identity.workspace_path.display().to_string(),
        "workspaceId": ctx.identity.workspace_id,
        "projectName": ctx.identity.project_name,
        "containerName": ctx.identity.container_name(),
        "sshHost": ctx.identity.ssh_host(),
        "configPath": ctx.config_path.display().to_string(),
        "engine": ctx.engine.binary(),
        "hashes": {
            "config": ctx.hashes.config,
            "dockerfile": ctx.hashes.dockerfile,
            "compose": ctx.hashes.compose,
            "features": ctx.hashes.features,
            "overall": ctx.hashes.overall,
        },
        "observed": observation.as_ref().map(|o| json!({
            "state": o.state.to_string(),
            "container": o.container.as_ref().map(|c| &c.name),
            "brokenReason": o.broken_reason,
        })),
    });
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(0)
}
