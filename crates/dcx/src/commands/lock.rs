//! `dcx lock`: resolve features and maintain the lockfile.
//!
//! The lockfile is only ever written here, never as a side effect of `up`.

use anyhow::Result;
use dcx_core::feature_resolver::{FeatureResolver, ResolveOptions};
use dcx_core::lockfile::{lockfile_path, read_lockfile, write_lockfile, Lockfile};
use std::path::Path;

use super::context::CommandContext;

pub async fn execute(workspace: Option<&Path>, verify: bool, frozen: bool) -> Result<i32> {
    let ctx = CommandContext::load(workspace)?;
    let path = lockfile_path(&ctx.config_path);

    if ctx.config.features.is_empty() {
        println!("No features declared; no lockfile needed.");
        return Ok(0);
    }

    let existing = read_lockfile(&path)?;
    let config_dir = ctx
        .config_path
        .parent()
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let mut resolver = FeatureResolver::new(&config_dir);
    let features = resolver
        .resolve(
            &ctx.config.features,
            ctx.config.override_feature_install_order.as_deref(),
            existing.as_ref(),
            ResolveOptions {
                force_pull: false,
                frozen,
            },
        )
        .await?;

    if frozen {
        // resolve() already failed on any divergence.
        println!("Lockfile matches ({} features).", features.len());
        return Ok(0);
    }

    if verify {
        let Some(existing) = existing else {
            println!("No lockfile at {}.", path.display());
            return Ok(1);
        };
        let mismatches = existing.verify(&features);
        if mismatches.is_empty() {
            println!("Lockfile is up to date.");
            return Ok(0);
        }
        for mismatch in &mismatches {
            println!("drift: {}", mismatch);
        }
        return Ok(1);
    }

    let lockfile = Lockfile::from_resolved(&features);
    write_lockfile(&path, &lockfile)?;
    println!(
        "Wrote {} ({} features pinned).",
        path.display(),
        lockfile.features.len()
    );
    Ok(0)
}
