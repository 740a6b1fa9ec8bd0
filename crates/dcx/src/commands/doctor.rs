//! `dcx doctor`: diagnose the host and workspace setup.
//!
//! Checks run independently; any failing check makes the exit code non-zero
//! but never prevents the remaining checks from reporting.

use anyhow::Result;
use dcx_core::doctor::{run_config_checks, run_system_checks, DoctorReport};
use dcx_core::engine::Engine;
use std::path::Path;

pub async fn execute(workspace: Option<&Path>, system: bool, config: bool) -> Result<i32> {
    let both = !system && !config;
    let mut report = DoctorReport::default();

    if system || both {
        let engine = Engine::detect();
        report = report.merge(run_system_checks(&engine).await);
    }
    if config || both {
        let workspace = workspace.unwrap_or(Path::new("."));
        report = report.merge(run_config_checks(workspace).await);
    }

    for check in &report.checks {
        let marker = if check.ok { "ok " } else { "FAIL" };
        println!("[{}] {:<18} {}", marker, check.name, check.detail);
    }

    Ok(if report.all_ok() { 0 } else { 1 })
}
