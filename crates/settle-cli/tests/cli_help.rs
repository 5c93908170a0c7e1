use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("settle")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("preview"));
}

#[test]
fn test_config_help_shows_subcommands() {
    cargo_bin_cmd!("settle")
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("path"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("show"));
}

#[test]
fn test_preview_help_shows_options() {
    cargo_bin_cmd!("settle")
        .args(["preview", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--now"))
        .stdout(predicate::str::contains("--gap"))
        .stdout(predicate::str::contains("--min-size"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("settle")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1"));
}
