//! CLI surface smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_both_subcommands() {
    Command::cargo_bin("xctr")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("test"))
        .stdout(predicate::str::contains("simulator_test"));
}

#[test]
fn test_subcommand_requires_a_device_id() {
    Command::cargo_bin("xctr")
        .unwrap()
        .arg("test")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--id"));
}

#[test]
fn test_subcommand_help_shows_run_options() {
    Command::cargo_bin("xctr")
        .unwrap()
        .args(["test", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--app_under_test_path"))
        .stdout(predicate::str::contains("--test_bundle_path"))
        .stdout(predicate::str::contains("--xctestrun"))
        .stdout(predicate::str::contains("--platform"));
}

#[test]
fn simulator_test_help_shows_simulator_options() {
    Command::cargo_bin("xctr")
        .unwrap()
        .args(["simulator_test", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--device_type"))
        .stdout(predicate::str::contains("--os_version"))
        .stdout(predicate::str::contains("--new_simulator_name_prefix"));
}

#[test]
fn invalid_test_type_is_rejected() {
    Command::cargo_bin("xctr")
        .unwrap()
        .args([
            "test",
            "--id",
            "SIM-1",
            "--test_type",
            "not_a_test_type",
        ])
        .assert()
        .failure();
}
