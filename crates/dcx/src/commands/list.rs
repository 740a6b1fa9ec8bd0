//! `dcx list`: list managed containers across all workspaces.

use anyhow::Result;
use dcx_core::engine::Engine;
use dcx_core::labels::{LABEL_MANAGED, LABEL_WORKSPACE_PATH};

pub async fn execute(all: bool) -> Result<i32> {
    let engine = Engine::detect();
    let containers = engine
        .list_containers(&[(LABEL_MANAGED.to_string(), "true".to_string())], all)
        .await?;

    if containers.is_empty() {
        println!("No managed containers.");
        return Ok(0);
    }

    for container in containers {
        let workspace = container
            .labels
            .get(LABEL_WORKSPACE_PATH)
            .map(String::as_str)
            .unwrap_or("<unknown>");
        println!(
            "{}\t{}\t{}\t{}",
            container.name, container.state, container.image, workspace
        );
    }
    Ok(0)
}
