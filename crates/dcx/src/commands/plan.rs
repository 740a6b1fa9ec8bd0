//! `dcx plan`: report what `up` would do, without doing it.

use anyhow::Result;
use dcx_core::reconcile::{decide, ReconcileFlags};
use std::path::Path;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let observation = ctx.observe().await?;
    let action = decide(observation.state, ReconcileFlags::default());

    println!("build method:  {}", ctx.build_method()?);
    println!("config hash:   {}", ctx.hashes.config);
    if !ctx.hashes.dockerfile.is_empty() {
        println!("dockerfile:    {}", ctx.hashes.dockerfile);
    }
    if !ctx.hashes.compose.is_empty() {
        println!("compose:       {}", ctx.hashes.compose);
    }
    println!("observed:      {}", observation.state);
    println!("action:        {}", action);
    if !ctx.config.features.is_empty() {
        println!("features:      {} declared", ctx.config.features.len());
    }
    Ok(0)
}
