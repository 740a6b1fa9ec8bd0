//! `dcx start`: offline-safe start of an existing container.
//!
//! Requires the CREATED state: nothing is pulled, built, or recreated here.

use anyhow::Result;
use dcx_core::compose::{ComposeProject, ComposeRunner};
use dcx_core::errors::{DcxError, StateError};
use dcx_core::lifecycle::LifecycleRunner;
use dcx_core::state::ContainerState;
use std::path::Path;
use tracing::info;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await?;

    match observation.state {
        ContainerState::Created => {}
        ContainerState::Absent => {
            return Err(DcxError::State(StateError::NotCreated).into());
        }
        ContainerState::Running => {
            return Err(DcxError::State(StateError::Unexpected {
                state: "already running".to_string(),
                hint: "nothing to start".to_string(),
            })
            .into());
        }
        ContainerState::Stale => {
            return Err(DcxError::State(StateError::Stale).into());
        }
        ContainerState::Broken => {
            return Err(DcxError::State(StateError::Broken {
                message: observation
                    .broken_reason
                    .unwrap_or_else(|| "unknown".to_string()),
            })
            .into());
        }
    }

    if ctx.config.uses_compose() {
        let project = ComposeProject::from_config(&ctx.config, &ctx.identity)?;
        ComposeRunner::new(&ctx.engine).start(&project).await?;
        info!(project = %project.name, "Started compose project");
    } else {
        let container = observation
            .container
            .as_ref()
            .expect("created state implies a container");
        ctx.engine.start(&container.id).await?;
        info!(container = %container.name, "Started container");
    }

    // postStart runs on every start.
    if let Some(container) = &observation.container {
        let hooks = ctx.hooks()?;
        let lifecycle_ctx = ctx.lifecycle_context(&container.id);
        LifecycleRunner::new(&ctx.engine)
            .run_start_sequence(&hooks, &lifecycle_ctx)
            .await?;
    }

    println!("Started.");
    Ok(0)
}
