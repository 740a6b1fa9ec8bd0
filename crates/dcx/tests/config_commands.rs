//! `config`, `lock`, and `run` behaviors that resolve entirely on the host.

use assert_cmd::Command;
use predicates::str as pred_str;
use tempfile::TempDir;

fn dcx() -> Command {
    Command::cargo_bin("dcx").expect("dcx binary builds")
}

fn workspace_with(config: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("dcx.json"), config).unwrap();
    tmp
}

#[test]
fn config_raw_prints_the_document_verbatim() {
    let raw = "{\n  // dev container\n  \"image\": \"alpine:3.19\",\n}\n";
    let tmp = workspace_with(raw);
    dcx()
        .arg("-w")
        .arg(tmp.path())
        .args(["config", "--raw"])
        .assert()
        .success()
        .stdout(pred_str::contains("// dev container"));
}

#[test]
fn config_validate_accepts_a_good_document() {
    let tmp = workspace_with(r#"{"image": "alpine:3.19"}"#);
    dcx()
        .arg("-w")
        .arg(tmp.path())
        .args(["config", "--validate"])
        .assert()
        .success()
        .stdout(pred_str::contains("valid"));
}

#[test]
fn config_validate_rejects_two_build_sources() {
    let tmp = workspace_with(r#"{"image": "a", "build": {"dockerfile": "Dockerfile"}}"#);
    dcx()
        .arg("-w")
        .arg(tmp.path())
        .args(["config", "--validate"])
        .assert()
        .failure()
        .stderr(pred_str::contains("mutually exclusive"));
}

#[test]
fn config_default_prints_parsed_json() {
    let tmp = workspace_with(r#"{"image": "alpine:3.19", "remoteUser": "dev"}"#);
    dcx()
        .arg("-w")
        .arg(tmp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(pred_str::contains("\"remoteUser\": \"dev\""));
}

#[test]
fn lock_without_features_needs_no_lockfile() {
    let tmp = workspace_with(r#"{"image": "alpine:3.19"}"#);
    dcx()
        .arg("-w")
        .arg(tmp.path())
        .arg("lock")
        .assert()
        .success()
        .stdout(pred_str::contains("No features declared"));
}

#[test]
fn lock_writes_a_lockfile_for_local_and_remote_features() {
    // Only a local feature, so no network is needed; local features are
    // excluded from the lockfile, leaving it empty but present.
    let tmp = workspace_with(r#"{"image": "alpine", "features": {"./f": {}}}"#);
    let feature_dir = tmp.path().join("f");
    std::fs::create_dir(&feature_dir).unwrap();
    std::fs::write(
        feature_dir.join("devcontainer-feature.json"),
        r#"{"id": "f", "version": "1.0.0"}"#,
    )
    .unwrap();

    dcx()
        .arg("-w")
        .arg(tmp.path())
        .arg("lock")
        .assert()
        .success()
        .stdout(pred_str::contains("dcx-lock.json"));
    assert!(tmp.path().join("dcx-lock.json").exists());
}

#[test]
fn run_without_sidecar_explains_what_is_missing() {
    let tmp = workspace_with(r#"{"image": "alpine:3.19"}"#);
    dcx()
        .arg("-w")
        .arg(tmp.path())
        .args(["run", "test"])
        .assert()
        .failure()
        .stderr(pred_str::contains("sidecar"));
}

#[test]
fn debug_dumps_identity_and_hashes() {
    let tmp = workspace_with(r#"{"name": "Demo", "image": "alpine:3.19"}"#);
    dcx()
        .arg("-w")
        .arg(tmp.path())
        .arg("debug")
        .assert()
        .success()
        .stdout(pred_str::contains("\"projectName\": \"demo\""))
        .stdout(pred_str::contains("\"config\":"));
}
