//! Environment diagnostics
//!
//! Runs independent checks over the host and the workspace configuration.
//! One failing check never aborts the others; the report carries every
//! outcome and the CLI maps any failure to a non-zero exit.

use crate::agent::host_agent_available;
use crate::config::DcxConfig;
use crate::engine::Engine;
use bytesize::ByteSize;
use serde::Serialize;
use std::path::Path;
use sysinfo::Disks;
use tracing::instrument;

/// Outcome of a single check
#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl DoctorCheck {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        DoctorCheck {
            name: name.to_string(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        DoctorCheck {
            name: name.to_string(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Collected check outcomes
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    pub fn merge(mut self, other: DoctorReport) -> Self {
        self.checks.extend(other.checks);
        self
    }
}

/// System-level checks: engine binary, daemon, compose plugin, disk space,
/// agent socket presence.
#[instrument(skip(engine))]
pub async fn run_system_checks(engine: &Engine) -> DoctorReport {
    let mut report = DoctorReport::default();

    match engine.version().await {
        Ok(version) => {
            report
                .checks
                .push(DoctorCheck::pass("engine", format!("server version {}", version)));
        }
        Err(e) => {
            report.checks.push(DoctorCheck::fail("engine", e.to_string()));
        }
    }

    match engine.ping().await {
        Ok(()) => report
            .checks
            .push(DoctorCheck::pass("engine-daemon", "reachable")),
        Err(e) => report
            .checks
            .push(DoctorCheck::fail("engine-daemon", e.to_string())),
    }

    // The compose tool is an external collaborator; probe it independently.
    let compose = tokio::process::Command::new(engine.binary())
        .args(["compose", "version", "--short"])
        .output()
        .await;
    match compose {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            report
                .checks
                .push(DoctorCheck::pass("compose", format!("version {}", version)));
        }
        Ok(output) => report.checks.push(DoctorCheck::fail(
            "compose",
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
        Err(e) => report
            .checks
            .push(DoctorCheck::fail("compose", e.to_string())),
    }

    report.checks.push(disk_space_check());

    report.checks.push(if host_agent_available() {
        DoctorCheck::pass("ssh-agent", "host agent socket exported")
    } else {
        // Not an error: forwarding simply stays off.
        DoctorCheck::pass("ssh-agent", "no host agent socket (forwarding disabled)")
    });

    report
}

/// Configuration-level checks: discovery, parse, build plan shape.
#[instrument]
pub async fn run_config_checks(workspace: &Path) -> DoctorReport {
    let mut report = DoctorReport::default();

    let config_path = match DcxConfig::discover(workspace) {
        Ok(path) => {
            report.checks.push(DoctorCheck::pass(
                "config-discovery",
                path.display().to_string(),
            ));
            Some(path)
        }
        Err(e) => {
            report
                .checks
                .push(DoctorCheck::fail("config-discovery", e.to_string()));
            None
        }
    };

    if let Some(path) = config_path {
        match DcxConfig::load(&path) {
            Ok((config, _raw)) => {
                report.checks.push(DoctorCheck::pass("config-parse", "valid"));
                match config.build_plan() {
                    Ok(plan) => {
                        let kind = match plan {
                            crate::config::BuildPlan::Image(_) => "image",
                            crate::config::BuildPlan::Dockerfile(_) => "dockerfile",
                            crate::config::BuildPlan::Compose { .. } => "compose",
                        };
                        report
                            .checks
                            .push(DoctorCheck::pass("config-build-plan", kind))
                    }
                    Err(e) => report
                        .checks
                        .push(DoctorCheck::fail("config-build-plan", e.to_string())),
                }
            }
            Err(e) => {
                report
                    .checks
                    .push(DoctorCheck::fail("config-parse", e.to_string()));
            }
        }
    }

    report
}

fn disk_space_check() -> DoctorCheck {
    let disks = Disks::new_with_refreshed_list();
    let available = disks
        .list()
        .iter()
        .map(|d| d.available_space())
        .max()
        .unwrap_or(0);
    if available == 0 {
        DoctorCheck::fail("disk-space", "could not determine available space")
    } else {
        DoctorCheck::pass(
            "disk-space",
            format!("{} available", ByteSize::b(available)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn config_checks_report_each_outcome_independently() {
        let tmp = TempDir::new().unwrap();
        // No configuration at all: discovery fails, nothing else runs.
        let report = run_config_checks(tmp.path()).await;
        assert!(!report.all_ok());
        assert_eq!(report.checks.len(), 1);

        // Parseable config with an invalid build plan: discovery and parse
        // pass while the plan check fails, without aborting the run.
        std::fs::write(
            tmp.path().join("dcx.json"),
            r#"{"image": "a", "build": {"dockerfile": "Dockerfile"}}"#,
        )
        .unwrap();
        let report = run_config_checks(tmp.path()).await;
        assert_eq!(report.checks.len(), 2);
        assert!(report.checks[0].ok);
        assert!(!report.checks[1].ok);
    }

    #[tokio::test]
    async fn system_checks_with_unreachable_engine_still_run_everything() {
        let engine = Engine::with_binary("definitely-not-a-container-engine");
        let report = run_system_checks(&engine).await;
        assert!(!report.all_ok());
        // Engine checks failed but the independent ones still reported.
        let names: Vec<&str> = report.checks.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"engine"));
        assert!(names.contains(&"engine-daemon"));
        assert!(names.contains(&"disk-space"));
        assert!(names.contains(&"ssh-agent"));
    }

    #[test]
    fn merge_concatenates_reports() {
        let a = DoctorReport {
            checks: vec![DoctorCheck::pass("one", "")],
        };
        let b = DoctorReport {
            checks: vec![DoctorCheck::fail("two", "")],
        };
        let merged = a.merge(b);
        assert_eq!(merged.checks.len(), 2);
        assert!(!merged.all_ok());
    }
}
