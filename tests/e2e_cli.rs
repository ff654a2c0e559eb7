//! CLI end-to-end tests
//!
//! Tests for the meshledger command-line interface.

use predicates::prelude::*;
use std::fs;
use std::path::Path;
use assert_cmd::Command;
use tempfile::tempdir;

/// Get a command for the meshledger binary
#[allow(deprecated)]
fn meshledger_cmd() -> Command {
    Command::cargo_bin("meshledger").unwrap()
}

fn in_project(project: &Path) -> Command {
    let mut cmd = meshledger_cmd();
    cmd.arg("--project").arg(project);
    cmd
}

/// Project named `reef` whose engine reports one ledger field per call.
fn write_project(dir: &Path, engine_line: &str) {
    let config = format!(
        r#"[project]
name = "reef"

[batch]
capacity = 2

[engine]
command = "sh"
args = ["-c", '{}', "engine", "{{item}}"]
"#,
        engine_line
    );
    fs::write(dir.join("project.toml"), config).unwrap();
}

fn add_frames(dir: &Path, id: &str) {
    let frames = dir.join("processing/frames").join(id);
    fs::create_dir_all(&frames).unwrap();
    fs::write(frames.join("frame_0001.jpg"), b"jpg").unwrap();
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = meshledger_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = meshledger_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("meshledger"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = meshledger_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_reset_help() {
    let mut cmd = meshledger_cmd();
    cmd.args(["reset", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("selective"))
        .stdout(predicate::str::contains("staged"));
}

#[test]
fn test_cli_missing_project_dir_fails() {
    in_project(Path::new("/nonexistent/meshledger/project"))
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_init_creates_layout() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), "true");

    in_project(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized project reef"));

    assert!(dir.path().join("processing/frames").is_dir());
    assert!(dir.path().join("output/psx").is_dir());
    let ledger = fs::read_to_string(dir.path().join("status_reef.csv")).unwrap();
    assert!(ledger.starts_with("Model ID,"));
}

#[test]
fn test_cli_init_writes_default_config() {
    let dir = tempdir().unwrap();
    in_project(dir.path()).arg("init").assert().success();
    assert!(dir.path().join("project.toml").is_file());

    in_project(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_cli_validate_rejects_bad_config() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("project.toml"), "[batch]\ncapacity = 0\n").unwrap();

    in_project(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("capacity"));
}

#[test]
fn test_cli_run_without_engine_fails() {
    let dir = tempdir().unwrap();
    in_project(dir.path())
        .args(["run", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("engine.command"));
}

#[test]
fn test_cli_bad_stage_fails() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), "true");
    in_project(dir.path())
        .args(["run", "7"])
        .assert()
        .failure();
}

#[cfg(unix)]
#[test]
fn test_cli_run_status_and_rerun() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), r#"echo "@ledger Tie points=42""#);
    for id in ["REEF_3D_BWR_T1", "REEF_3D_BWR_T2", "REEF_3D_BID_T1"] {
        add_frames(dir.path(), id);
    }

    in_project(dir.path())
        .args(["run", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 succeeded"))
        .stdout(predicate::str::contains("2 container(s)"));

    let ledger = fs::read_to_string(dir.path().join("status_reef.csv")).unwrap();
    assert!(ledger.contains("42"));
    assert!(dir
        .path()
        .join("processing/batch_manifest_step1.csv")
        .is_file());
    assert!(dir.path().join("output/logs/REEF_3D_BWR_T1_step1.log").is_file());

    in_project(dir.path())
        .args(["run", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 skipped"))
        .stdout(predicate::str::contains("0 succeeded"));

    in_project(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("REEF_3D_BID_T1"))
        .stdout(predicate::str::contains("Step 1 complete"));

    in_project(dir.path())
        .args(["status", "--stage", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 of 3 item(s)"));
}

#[cfg(unix)]
#[test]
fn test_cli_engine_failure_keeps_exit_zero() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), "echo broken >&2; exit 2");
    add_frames(dir.path(), "REEF_3D_BWR_T1");

    in_project(dir.path())
        .args(["run", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 failed"));

    let ledger = fs::read_to_string(dir.path().join("status_reef.csv")).unwrap();
    assert!(ledger.contains("Error in Step 1"));
}

#[cfg(unix)]
#[test]
fn test_cli_selective_reset_dry_run_then_force() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), "true");
    add_frames(dir.path(), "REEF_3D_BWR_T1");
    in_project(dir.path()).args(["run", "1"]).assert().success();
    let ledger_path = dir.path().join("status_reef.csv");
    let before = fs::read(&ledger_path).unwrap();

    in_project(dir.path())
        .args([
            "reset",
            "selective",
            "--items",
            "REEF_3D_BWR_T1,REEF_3D_XXX_T9",
            "--stages",
            "1",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("REEF_3D_BWR_T1 Step 1: TRUE → FALSE"))
        .stdout(predicate::str::contains("DRY RUN"));
    assert_eq!(fs::read(&ledger_path).unwrap(), before);

    in_project(dir.path())
        .args(["reset", "selective", "--items", "REEF_3D_BWR_T1", "--stages", "1"])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reset cancelled"));
    assert_eq!(fs::read(&ledger_path).unwrap(), before);

    in_project(dir.path())
        .args([
            "reset",
            "selective",
            "--items",
            "REEF_3D_BWR_T1",
            "--stages",
            "1",
            "--force",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reset complete"));
    let ledger = fs::read_to_string(&ledger_path).unwrap();
    assert!(ledger.contains("Reset for reprocessing: Step 1"));
}

#[cfg(unix)]
#[test]
fn test_cli_cancelled_selective_reset_leaves_repairable_ledger_alone() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), "true");
    add_frames(dir.path(), "REEF_3D_BWR_T1");
    in_project(dir.path()).args(["run", "1"]).assert().success();

    // A repeated header row is repaired whenever the ledger is opened for writing.
    let ledger_path = dir.path().join("status_reef.csv");
    let mut text = fs::read_to_string(&ledger_path).unwrap();
    let header = text.lines().next().unwrap().to_string();
    text.push_str(&header);
    text.push('\n');
    fs::write(&ledger_path, &text).unwrap();

    in_project(dir.path())
        .args(["reset", "selective", "--items", "REEF_3D_BWR_T1", "--stages", "1"])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reset cancelled"));
    assert_eq!(fs::read_to_string(&ledger_path).unwrap(), text);
}

#[test]
fn test_cli_selective_reset_unknown_items_fails() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), "true");
    in_project(dir.path()).arg("init").assert().success();

    in_project(dir.path())
        .args(["reset", "selective", "--items", "NOPE", "--stages", "1", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("none of the requested items"));
}

#[cfg(unix)]
#[test]
fn test_cli_staged_reset_requires_typed_confirmation() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), "true");
    add_frames(dir.path(), "REEF_3D_BWR_T1");
    in_project(dir.path()).args(["run", "1"]).assert().success();
    in_project(dir.path()).args(["run", "2"]).assert().success();
    let site = dir.path().join("output/psx/BWR_step2.psx");
    fs::write(&site, b"site").unwrap();

    in_project(dir.path())
        .args(["reset", "staged", "after-1"])
        .write_stdin("yes\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reset cancelled"));
    assert!(site.exists());

    in_project(dir.path())
        .args(["reset", "staged", "after-1", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("empty  output/psx (1 files)"));
    assert!(site.exists());

    in_project(dir.path())
        .args(["reset", "staged", "after-1"])
        .write_stdin("YES\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reset complete"));
    assert!(!site.exists());
    assert!(dir.path().join("processing/frames/REEF_3D_BWR_T1").is_dir());

    in_project(dir.path())
        .args(["status", "--stage", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Step 1 complete"));
}

#[test]
fn test_cli_staged_reset_bad_target_fails() {
    let dir = tempdir().unwrap();
    in_project(dir.path())
        .args(["reset", "staged", "after-4", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("after-"));
}

#[test]
fn test_cli_check_engine_reports_missing() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("project.toml"),
        "[engine]\ncommand = \"nonexistent_engine_12345\"\n",
    )
    .unwrap();
    in_project(dir.path())
        .arg("check-engine")
        .assert()
        .success()
        .stdout(predicate::str::contains("✗ nonexistent_engine_12345"));
}
