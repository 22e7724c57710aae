//! Smoke tests -- verify the binary runs and the subcommands are wired.

use assert_cmd::Command;
use predicates::prelude::*;

fn observatory_with_config(dir: &tempfile::TempDir) -> Command {
    let config = dir.path().join("observatory.toml");
    std::fs::write(
        &config,
        format!(
            "[storage]\ndb_path = \"{}\"\n\n[reports]\nexport_root = \"{}\"\n\n[mail]\ntransport = \"log\"\n",
            dir.path().join("observatory.db").display(),
            dir.path().join("exports").display()
        ),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("observatory").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("observatory")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Web accessibility observatory"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("observatory")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("observatory"));
}

#[test]
fn test_generate_reports_requires_email() {
    Command::cargo_bin("observatory")
        .unwrap()
        .args(["generate-reports", "--observatory", "1", "--execution", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--email"));
}

#[test]
fn test_crawl_launch_subcommand_exists() {
    Command::cargo_bin("observatory")
        .unwrap()
        .args(["crawl", "launch", "--help"])
        .assert()
        .success();
}

#[test]
fn test_reconcile_on_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    observatory_with_config(&dir)
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("Marked 0 crawl(s) and 0 execution(s) as failed."));
    assert!(dir.path().join("observatory.db").exists());
}

#[test]
fn test_unknown_crawl_status_fails() {
    let dir = tempfile::tempdir().unwrap();
    observatory_with_config(&dir)
        .args(["crawl", "status", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("crawl 42 not found"));
}

#[test]
fn test_execution_launch_on_unknown_observatory_fails() {
    let dir = tempfile::tempdir().unwrap();
    observatory_with_config(&dir)
        .args(["execution", "launch", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("observatory 7 not found"));
}
