//! Smoke tests -- verify the binary runs and each command reaches the store.

use assert_cmd::Command;
use predicates::prelude::*;

fn cli(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("alertpilot").unwrap();
    cmd.env_remove("ALERTPILOT_CONFIG")
        .env("RUST_LOG", "error")
        .arg("--db")
        .arg(dir.path().join("alertpilot.db"));
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("alertpilot")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("metric forecasting and alert noise reduction"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("alertpilot")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("alertpilot"));
}

#[test]
fn test_subcommands_exist() {
    for args in [
        vec!["predict", "--help"],
        vec!["crossing", "--help"],
        vec!["exhaustion", "--help"],
        vec!["check", "--help"],
        vec!["rules", "add", "--help"],
        vec!["stats", "--help"],
        vec!["flapping", "--help"],
        vec!["watch", "--help"],
    ] {
        Command::cargo_bin("alertpilot")
            .unwrap()
            .args(&args)
            .assert()
            .success();
    }
}

#[test]
fn test_predict_with_empty_history() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir)
        .args(["predict", "--device", "D1", "--metric", "cpu_usage"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Not enough history"));
}

#[test]
fn test_rule_add_then_list_json() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir)
        .args([
            "rules", "add", "--name", "patch window", "--type", "maintenance", "--device", "D1",
            "--meta", "ticket=OPS-12",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("Rule 'patch window' added"));

    cli(&dir)
        .args(["rules", "list", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"name\": \"patch window\"").and(predicates::str::contains("OPS-12")));
}

#[test]
fn test_invalid_rule_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir)
        .args(["rules", "add", "--name", "bad", "--type", "regex", "--device", "D1"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid suppression rule"));
}

#[test]
fn test_check_suppressed_by_rule() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir)
        .args(["rules", "add", "--name", "db upgrade", "--type", "known_issue", "--device", "D7"])
        .assert()
        .success();

    cli(&dir)
        .args([
            "check", "--device", "D7", "--alert-type", "cpu_high", "--message", "cpu at 97%", "--record",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("SUPPRESS (rule:db upgrade)"));

    cli(&dir)
        .args(["stats", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"suppressed_alerts\": 1"));
}

#[test]
fn test_watch_rejects_bad_cron() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir)
        .args(["watch", "--schedule", "sometimes", "--device", "D1", "--once"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("Invalid cron expression"));
}

#[test]
fn test_watch_once_reports_scan() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir)
        .args(["watch", "--device", "D1", "--device", "D2", "--once"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Scanned 2 devices"));
}

#[test]
fn test_watch_preview_lists_runs() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir)
        .args(["watch", "--schedule", "0 0 * * * *", "--device", "D1", "--preview", "3"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Upcoming scans in the next 3h (3)"));
}
