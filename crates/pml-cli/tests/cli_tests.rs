// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the `pml` CLI binary.

use assert_cmd::Command;
use predicates::str::contains;

fn pml() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("pml").expect("binary `pml` should be built")
}

#[test]
fn help_flag_prints_usage() {
    pml().arg("--help").assert().success().stdout(contains("Procedural-memory execution core CLI")).stdout(contains("init")).stdout(contains("serve"));
}

#[test]
fn version_flag_prints_version() {
    pml().arg("--version").assert().success().stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn init_scaffolds_pml_directory() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "init"]).assert().success();
    assert!(tmp.path().join(".pml").join("config.toml").is_file());
    assert!(tmp.path().join(".pml").join("capabilities").is_dir());
}

#[test]
fn init_twice_is_idempotent() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "init"]).assert().success();
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "init"]).assert().success().stdout(contains("already exists"));
}

#[test]
fn list_on_fresh_workspace_is_empty_but_succeeds() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "init"]).assert().success();
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "list"]).assert().success();
}

#[test]
fn run_on_unknown_capability_fails_with_generic_exit_code() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "init"]).assert().success();
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "run", "no.such.cap.action.dead"]).assert().code(1);
}

#[test]
fn remove_on_unknown_key_fails() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "init"]).assert().success();
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "remove", "nothing-registered"]).assert().failure();
}

#[test]
fn invalid_config_is_reported_as_config_error() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let pml_dir = tmp.path().join(".pml");
    std::fs::create_dir_all(&pml_dir).unwrap();
    std::fs::write(pml_dir.join("config.toml"), "[servers.broken]\ncommand = \"\"\n").unwrap();
    pml().args(["--workspace", tmp.path().to_str().unwrap(), "list"]).assert().code(2);
}
