//! `dcx config`: show or validate the resolved configuration.

use anyhow::Result;
use std::path::Path;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>, raw: bool, validate: bool) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;

    if raw {
        print!("{}", ctx.raw_config);
        return Ok(0);
    }
    if validate {
        // Loading already validated; report and include the plan shape.
        ctx.config.validate()?;
        println!(
            "{}: valid ({} plan)",
            ctx.config_path.display(),
            ctx.build_method()?
        );
        return Ok(0);
    }

    println!("{}", serde_json::to_string_pretty(&ctx.config)?);
    Ok(0)
}
