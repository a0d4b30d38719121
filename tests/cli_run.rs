use predicates::prelude::*;

#[test]
fn run_without_settings_file_fails_with_context() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("coursedump");
    cmd.args(["run", "--config", "does-not-exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("read settings file"));
}

#[test]
fn run_with_malformed_settings_file_fails_with_context() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("settings.yaml");
    std::fs::write(&path, "portal: [not, a, mapping]").expect("write settings");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("coursedump");
    cmd.args(["run", "--config", path.to_str().expect("utf-8 path")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parse settings file"));
}

#[test]
fn help_lists_the_run_command() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("coursedump");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"));
}
