//! Smoke tests -- verify the binary runs and key subcommands load.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("confirmd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Single-run orchestrator"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("confirmd")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("confirmd"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("confirmd")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--bind"));
}

#[test]
fn test_merge_config_prints_merged_tree() {
    let dir = tempfile::TempDir::new().unwrap();
    let base = dir.path().join("base.json");
    let overlay = dir.path().join("override.json");
    std::fs::write(&base, r#"{"a": {"x": 1, "y": 2}, "b": 1}"#).unwrap();
    std::fs::write(&overlay, r#"{"a": {"y": 9, "z": 3}, "b": {"x": 1}}"#).unwrap();

    let output = Command::cargo_bin("confirmd")
        .unwrap()
        .env_remove("CONFIRMD_CONFIG")
        .current_dir(dir.path())
        .args(["merge-config", "--base"])
        .arg(&base)
        .arg("--override")
        .arg(&overlay)
        .output()
        .unwrap();
    assert!(output.status.success());

    let merged: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        merged,
        serde_json::json!({"a": {"x": 1, "y": 9, "z": 3}, "b": {"x": 1}})
    );
}

#[test]
fn test_merge_config_missing_base_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("confirmd")
        .unwrap()
        .env_remove("CONFIRMD_CONFIG")
        .current_dir(dir.path())
        .args(["merge-config", "--base", "missing.json", "--override", "also-missing.json"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("base configuration unavailable"));
}
