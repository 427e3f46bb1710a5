//! CLI-level smoke tests (spec §8 end-to-end scenarios, the subset that
//! doesn't need a fake `git`/`gh`/agent harness): argument parsing and
//! fatal-startup-error paths, exercised against the real compiled binary.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_documented_flags() {
    Command::cargo_bin("ralph")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--task"))
        .stdout(predicate::str::contains("--parallelism"))
        .stdout(predicate::str::contains("--branch-prefix"));
}

#[test]
fn missing_required_binary_on_path_exits_one_before_touching_the_repo() {
    let tmp = tempfile::tempdir().unwrap();
    let empty_path_dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("ralph")
        .unwrap()
        .current_dir(tmp.path())
        .env("PATH", empty_path_dir.path())
        .assert()
        .failure()
        .code(1);
}

#[test]
fn malformed_config_json_is_a_fatal_error_not_a_panic() {
    let tmp = tempfile::tempdir().unwrap();
    let bad_config = tmp.path().join("ralph.json");
    std::fs::write(&bad_config, "{ not valid json").unwrap();

    Command::cargo_bin("ralph")
        .unwrap()
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&bad_config)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("ralph:"));
}
