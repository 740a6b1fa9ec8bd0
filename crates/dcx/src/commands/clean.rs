//! `dcx clean`: remove dcx-managed containers and derived images.
//!
//! Default: remove stopped managed containers. `--all` also removes running
//! containers and every dcx-built image; `--dangling` removes only derived
//! images no container references. `--dry-run` prints without removing.

use anyhow::Result;
use dcx_core::engine::Engine;
use dcx_core::labels::LABEL_MANAGED;
use tracing::info;

pub async fn execute(all: bool, dangling: bool, dry_run: bool) -> Result<i32> {
    let engine = Engine::detect();

    let containers = engine
        .list_containers(&[(LABEL_MANAGED.to_string(), "true".to_string())], true)
        .await?;
    let mut image_refs: Vec<String> = engine.list_images("dcx/").await?;
    image_refs.extend(engine.list_images("dcx-derived-").await?);

    let in_use: Vec<&str> = containers.iter().map(|c| c.image.as_str()).collect();

    if !dangling {
        for container in &containers {
            if container.is_running() && !all {
                continue;
            }
            if dry_run {
                println!("would remove container {}", container.name);
                continue;
            }
            info!(container = %container.name, "Removing container");
            engine.remove(&container.id, true, false).await?;
            println!("removed container {}", container.name);
        }
    }

    if all || dangling {
        for image in &image_refs {
            if dangling && in_use.contains(&image.as_str()) {
                continue;
            }
            if dry_run {
                println!("would remove image {}", image);
                continue;
            }
            // Removal can fail while a surviving container still uses the
            // image; report and keep going.
            match engine.remove_image(image).await {
                Ok(()) => println!("removed image {}", image),
                Err(e) => println!("skipped image {}: {}", image, e),
            }
        }
    }

    Ok(0)
}
