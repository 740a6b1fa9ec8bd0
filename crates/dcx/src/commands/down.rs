//! `dcx down`: remove the workspace's containers (and optionally volumes).

use anyhow::Result;
use dcx_core::compose::{ComposeProject, ComposeRunner};
use dcx_core::state::ContainerState;
use std::path::Path;
use tracing::info;

use super::context::CommandContext;

pub async fn execute(
    workspace: Option<&Path>,
    volumes: bool,
    remove_orphans: bool,
) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;

    if ctx.config.uses_compose() {
        let project = ComposeProject::from_config(&ctx.config, &ctx.identity)?;
        ComposeRunner::new(&ctx.engine)
            .down(&project, volumes, remove_orphans)
            .await?;
        info!(project = %project.name, "Removed compose project");
        println!("Removed.");
        return Ok(0);
    }

    let observation = ctx.observe().await?;
    if observation.state == ContainerState::Absent {
        println!("No container to remove.");
        return Ok(0);
    }

    if let Some(container) = &observation.container {
        ctx.engine.remove(&container.id, true, volumes).await?;
        info!(container = %container.name, "Removed container");
    } else {
        let name = ctx.identity.container_name();
        let _ = ctx.engine.remove(&name, true, volumes).await;
    }
    for secondary in &observation.secondaries {
        ctx.engine.remove(&secondary.id, true, volumes).await?;
    }

    println!("Removed.");
    Ok(0)
}
