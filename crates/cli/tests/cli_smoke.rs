//! CLI smoke tests for forge.
//!
//! These tests run the binary against small configurations in temporary directories
//! and check exit codes, printed summaries and the saved database.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the forge binary, working inside `dir`.
fn forge_cmd(dir: &TempDir) -> Command {
  let mut cmd = cargo_bin_cmd!("forge");
  cmd.arg("-C").arg(dir.path()).env_remove("RUST_LOG").env("FORGE_WORKERS", "0");
  cmd
}

/// Create a temp directory with a `forge.json`.
fn temp_config(content: &str) -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("forge.json"), content).unwrap();
  temp
}

/// Copies `input.txt` to `out/copy.txt`; `all` aliases the copy.
const COPY_CONFIG: &str = r#"{
  "targets": [
    { "type": "copy", "name": "out/copy.txt", "source": "input.txt" },
    { "type": "alias", "name": "all", "targets": ["out/copy.txt"] }
  ]
}"#;

/// The copy source never exists.
const BROKEN_CONFIG: &str = r#"{
  "targets": [
    { "type": "copy", "name": "out/copy.txt", "source": "missing.txt" },
    { "type": "alias", "name": "all", "targets": ["out/copy.txt"] }
  ]
}"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cargo_bin_cmd!("forge")
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  cargo_bin_cmd!("forge")
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("forge"));
}

// =============================================================================
// build
// =============================================================================

#[test]
fn build_copies_file_and_saves_database() {
  let temp = temp_config(COPY_CONFIG);
  std::fs::write(temp.path().join("input.txt"), "payload").unwrap();

  forge_cmd(&temp)
    .assert()
    .success()
    .stdout(predicate::str::contains("Built 'all'"));

  assert_eq!(
    std::fs::read_to_string(temp.path().join("out/copy.txt")).unwrap(),
    "payload"
  );
  assert!(temp.path().join("forge.fdb").exists());
}

#[test]
fn second_build_reuses_database() {
  let temp = temp_config(COPY_CONFIG);
  std::fs::write(temp.path().join("input.txt"), "payload").unwrap();

  forge_cmd(&temp).assert().success();

  let output = forge_cmd(&temp).args(["--output", "json"]).assert().success();
  let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
  let summaries: serde_json::Value = serde_json::from_str(&stdout).unwrap();

  let types = summaries[0]["types"].as_array().unwrap();
  let copy = types.iter().find(|t| t["node_type"] == "Copy").unwrap();
  assert_eq!(copy["seen"], 1);
  assert_eq!(copy["built"], 0);
}

#[test]
fn changed_configuration_is_reparsed() {
  let temp = temp_config(COPY_CONFIG);
  std::fs::write(temp.path().join("input.txt"), "payload").unwrap();
  forge_cmd(&temp).assert().success();

  std::fs::write(
    temp.path().join("forge.json"),
    COPY_CONFIG.replace("out/copy.txt", "out/other.txt"),
  )
  .unwrap();

  forge_cmd(&temp)
    .assert()
    .success()
    .stderr(predicate::str::contains("reparsing will occur"));
  assert!(temp.path().join("out/other.txt").exists());
}

#[test]
fn failed_build_exits_non_zero() {
  let temp = temp_config(BROKEN_CONFIG);

  forge_cmd(&temp)
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("failed"));
}

#[test]
fn unknown_target_fails() {
  let temp = temp_config(COPY_CONFIG);

  forge_cmd(&temp)
    .arg("nonexistent")
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown build target"));
}

#[test]
fn missing_config_fails() {
  let temp = TempDir::new().unwrap();

  forge_cmd(&temp)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn summary_prints_statistics_table() {
  let temp = temp_config(COPY_CONFIG);
  std::fs::write(temp.path().join("input.txt"), "payload").unwrap();

  forge_cmd(&temp)
    .arg("--summary")
    .assert()
    .success()
    .stdout(predicate::str::contains("Type").and(predicate::str::contains("Total")));
}

// =============================================================================
// list
// =============================================================================

#[test]
fn list_shows_nodes_without_building() {
  let temp = temp_config(COPY_CONFIG);

  forge_cmd(&temp)
    .arg("--list")
    .assert()
    .success()
    .stdout(predicate::str::contains("3 node(s)").and(predicate::str::contains("Alias")));

  assert!(!temp.path().join("out/copy.txt").exists());
  assert!(!temp.path().join("forge.fdb").exists());
}
