use std::path::Path;
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::prelude::*;

fn selfext() -> Command {
    let mut cmd = Command::cargo_bin("selfext").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("SELFEXT_CONFIG");
    cmd
}

fn git_available() -> bool {
    StdCommand::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn scratch_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.path().join("README.md"), "tools\n").unwrap();
    git(dir.path(), &["add", "README.md"]);
    git(dir.path(), &["commit", "-q", "-m", "init"]);
    dir
}

#[test]
fn gate_with_no_statuses_is_not_ready() {
    selfext()
        .args(["gate", "--required", "ci/build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ready\": false"))
        .stdout(predicate::str::contains("\"missingContexts\": [\n    \"ci/build\"\n  ]"));
}

#[test]
fn gate_normalizes_case() {
    selfext()
        .args(["gate", "--status", "CI/Build=SUCCESS", "--required", "ci/build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ready\": true"));
}

#[test]
fn gate_rejects_malformed_status() {
    selfext()
        .args(["gate", "--status", "ci/build"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected CONTEXT=STATE"));
}

#[test]
fn branch_name_is_deterministic() {
    let args = [
        "branch-name",
        "--tool",
        "Weather Lookup",
        "--file",
        "tools/weather.sh",
        "--content",
        "execute() { echo sunny; }",
        "--goal",
        "12",
    ];
    let first = selfext().args(args).assert().success().get_output().stdout.clone();
    let second = selfext().args(args).assert().success().get_output().stdout.clone();
    assert_eq!(first, second);
    let text = String::from_utf8(first).unwrap();
    assert!(text.contains("jarvis/self-extension/weather-lookup/g12-ccycle-ssubgoal-"));
    assert!(text.contains("\"goalId\": 12"));
}

#[test]
fn pause_requires_reason() {
    selfext()
        .arg("pause")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--reason"));
}

#[test]
fn pause_rejects_blank_reason() {
    selfext()
        .args(["pause", "--reason", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reason"));
}

#[test]
fn pause_prints_state() {
    selfext()
        .args(["pause", "--reason", "incident 42", "--by", "oncall"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"paused\": true"))
        .stdout(predicate::str::contains("incident 42"));
}

#[test]
fn promote_unknown_run_fails() {
    selfext()
        .args(["promote", "no-such-run", "--status", "ci/build=success"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown run"));
}

#[test]
fn stage_promote_and_status_share_sqlite_ledger() {
    if !git_available() {
        return;
    }
    let repo = scratch_repo();
    let state = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", state.path().join("ledger.db").display());

    let with_env = |cmd: &mut Command| {
        cmd.env("SELFEXT_REPOSITORY__PATH", repo.path())
            .env("SELFEXT_STORAGE__TYPE", "sqlite")
            .env("SELFEXT_STORAGE__URL", &url);
    };

    let mut stage = selfext();
    with_env(&mut stage);
    let output = stage
        .args([
            "stage",
            "--tool",
            "echo",
            "--file",
            "tools/echo.sh",
            "--content",
            "execute() { printf '%s' \"$1\"; }\n",
            "--input",
            "{\"text\":\"hi\"}",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let run_id = report["runId"].as_str().unwrap().to_string();
    assert_eq!(git(repo.path(), &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
    assert!(repo.path().join("tools/echo.sh").exists());

    let mut promote = selfext();
    with_env(&mut promote);
    promote
        .args(["promote", &run_id, "--status", "ci/build=success", "--status", "ci/test=passed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"decision\": \"promote\""));

    let mut ledger = selfext();
    with_env(&mut ledger);
    ledger
        .args(["ledger", "--run", &run_id, "--verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"chainVerified\": true"))
        .stdout(predicate::str::contains("\"promoted\""));

    let mut status = selfext();
    with_env(&mut status);
    status
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rollbackInProgress\": false"));
}
