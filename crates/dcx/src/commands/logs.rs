//! `dcx logs`: stream logs from the primary container.

use anyhow::Result;
use dcx_core::errors::{DcxError, StateError};
use std::path::Path;

use super::context::CommandContext;

pub async fn execute(
    workspace: Option<&Path>,
    follow: bool,
    tail: Option<u32>,
    timestamps: bool,
) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await?;
    let Some(container) = &observation.container else {
        return Err(DcxError::State(StateError::NotCreated).into());
    };
    let code = ctx
        .engine
        .logs(&container.id, follow, tail, timestamps)
        .await?;
    Ok(code)
}
