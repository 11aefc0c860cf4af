//! CLI end-to-end tests
//!
//! Tests for the dropconvert command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the dropconvert binary
#[allow(deprecated)]
fn dropconvert_cmd() -> Command {
    let mut cmd = Command::cargo_bin("dropconvert").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = dropconvert_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = dropconvert_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dropconvert"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = dropconvert_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_check_tools_command() {
    let mut cmd = dropconvert_cmd();
    cmd.arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffmpeg"))
        .stdout(predicate::str::contains("magick"));
}

#[test]
fn test_cli_convert_requires_files() {
    let mut cmd = dropconvert_cmd();
    cmd.arg("convert")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_convert_nonexistent_file() {
    let mut cmd = dropconvert_cmd();
    cmd.args(["convert", "/nonexistent/path/clip.mov"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn test_cli_convert_unsupported_file_fails() {
    let temp = tempdir().unwrap();
    let notes = temp.path().join("notes.txt");
    fs::write(&notes, "hello").unwrap();

    let mut cmd = dropconvert_cmd();
    cmd.arg("convert")
        .arg(&notes)
        .arg("--json")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"type\":\"job_added\""))
        .stdout(predicate::str::contains("unsupported format"))
        .stdout(predicate::str::contains("\"type\":\"queue_drained\""));
}

#[test]
fn test_cli_convert_rejects_zero_concurrency() {
    let temp = tempdir().unwrap();
    let clip = temp.path().join("clip.mov");
    fs::write(&clip, "data").unwrap();

    let mut cmd = dropconvert_cmd();
    cmd.arg("convert")
        .arg(&clip)
        .args(["--concurrency", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--concurrency"));
}

#[test]
fn test_cli_validate_config() {
    let temp = tempdir().unwrap();
    let config_file = temp.path().join("config.toml");
    fs::write(
        &config_file,
        r#"
[queue]
concurrency_limit = 4

[conversion]
hardware_accelerator = "amd"
"#,
    )
    .unwrap();

    let mut cmd = dropconvert_cmd();
    cmd.arg("validate")
        .arg(&config_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Concurrency limit: 4"))
        .stdout(predicate::str::contains("amd"));
}

#[test]
fn test_cli_validate_invalid_config() {
    let temp = tempdir().unwrap();
    let config_file = temp.path().join("config.toml");
    fs::write(&config_file, "[queue]\nconcurrency_limit = 0\n").unwrap();

    let mut cmd = dropconvert_cmd();
    cmd.arg("validate")
        .arg(&config_file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency_limit"));
}

#[test]
fn test_cli_thumbnail_nonexistent_file() {
    let temp = tempdir().unwrap();
    let mut cmd = dropconvert_cmd();
    cmd.args(["thumbnail", "/nonexistent/photo.heic", "-o"])
        .arg(temp.path().join("thumb.jpg"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("exist"));
}
