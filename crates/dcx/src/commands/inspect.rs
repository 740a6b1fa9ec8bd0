//! `dcx inspect`: print the engine's inspect output for the primary container.

use anyhow::Result;
use dcx_core::errors::{DcxError, StateError};
use std::path::Path;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await?;
    let Some(container) = &observation.container else {
        return Err(DcxError::State(StateError::NotCreated).into());
    };
    let Some(details) = ctx.engine.inspect_container(&container.id).await? else {
        return Err(DcxError::State(StateError::NotCreated).into());
    };
    println!("{}", serde_json::to_string_pretty(&details)?);
    Ok(0)
}
