//! `dcx stop`: stop the workspace's containers.
//!
//! Stops RUNNING, STALE, and BROKEN containers. A configuration with
//! `shutdownAction: "none"` makes this a no-op unless `--force` is given.

use anyhow::Result;
use dcx_core::compose::{ComposeProject, ComposeRunner};
use dcx_core::state::ContainerState;
use std::path::Path;
use tracing::info;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>, force: bool) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;

    if ctx.config.shutdown_action.as_deref() == Some("none") && !force {
        println!("shutdownAction is \"none\"; not stopping (use --force to override).");
        return Ok(0);
    }

    let observation = ctx.observe().await?;
    match observation.state {
        ContainerState::Absent => {
            println!("No container to stop.");
            return Ok(0);
        }
        ContainerState::Created => {
            println!("Container is not running.");
            return Ok(0);
        }
        ContainerState::Running | ContainerState::Stale | ContainerState::Broken => {}
    }

    if ctx.config.uses_compose() {
        let project = ComposeProject::from_config(&ctx.config, &ctx.identity)?;
        ComposeRunner::new(&ctx.engine).stop(&project).await?;
        info!(project = %project.name, "Stopped compose project");
    } else if let Some(container) = &observation.container {
        ctx.engine.stop(&container.id).await?;
        for secondary in &observation.secondaries {
            if secondary.running {
                ctx.engine.stop(&secondary.id).await?;
            }
        }
        info!(container = %container.name, "Stopped container");
    } else {
        // Broken without an identified container: stop by expected name.
        let name = ctx.identity.container_name();
        ctx.engine.stop(&name).await?;
    }

    println!("Stopped.");
    Ok(0)
}
