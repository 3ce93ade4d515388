//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn cli_without_arguments_prints_help_and_fails() {
    let mut cmd = cargo_bin_cmd!("amiferry");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn cli_help_documents_the_positional_arguments() {
    let mut cmd = cargo_bin_cmd!("amiferry");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("IMAGE_ID"))
        .stdout(predicate::str::contains("SOURCE_REGION"))
        .stdout(predicate::str::contains("DESTINATION_REGION"))
        .stdout(predicate::str::contains("--windows-template"));
}

#[test]
fn cli_rejects_a_missing_required_flag() {
    let mut cmd = cargo_bin_cmd!("amiferry");
    cmd.args(["ami-12345678", "us-east-1", "eu-west-1"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--server-tool"));
}
