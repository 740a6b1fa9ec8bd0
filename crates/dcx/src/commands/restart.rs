//! `dcx restart`: stop, then start (or `up --rebuild`).

use anyhow::Result;
use std::path::Path;

use super::{stop, up};

pub async fn execute(workspace: Option<&Path>, force: bool, rebuild: bool) -> Result<i32> {
    let code = stop::execute(workspace, force).await?;
    if code != 0 {
        return Ok(code);
    }
    up::up_for_restart(workspace, rebuild).await
}
