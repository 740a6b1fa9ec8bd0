//! `dcx status`: show the workspace's observed container state.

use anyhow::Result;
use std::path::Path;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>, detailed: bool) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await?;

    println!("workspace:  {}", ctx.identity.workspace_path.display());
    println!("identity:   {}", ctx.identity.display_name());
    println!("state:      {}", observation.state);
    if let Some(reason) = &observation.broken_reason {
        println!("reason:     {}", reason);
    }

    if let Some(container) = &observation.container {
        println!("container:  {} ({})", container.name, &container.id[..12.min(container.id.len())]);
        println!("image:      {}", container.image);
        println!("status:     {}", container.status);
        if let Some(created) = container.created_at {
            println!("created:    {}", created);
        }
        if detailed {
            println!("labels:");
            println!("  workspace-id:    {}", container.labels.workspace_id);
            println!("  build-method:    {}", container.labels.build_method);
            println!("  hash-config:     {}", container.labels.hash_config);
            println!("  desired config:  {}", ctx.hashes.config);
            if container.legacy {
                println!("  schema:          legacy (will migrate on next up)");
            }
        }
    }
    for secondary in &observation.secondaries {
        println!("service:    {} ({})", secondary.name, secondary.status);
    }
    Ok(0)
}
