//! Tests for the `sluice` binary.
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn sluice() -> Command {
    Command::cargo_bin("sluice").expect("binary is built")
}

#[test]
fn prints_captured_stdout() {
    sluice()
        .args(["run", "--stdout", "capture", "--", "/bin/sh", "-c", "printf hi"])
        .assert()
        .success()
        .stdout("hi");
}

#[test]
fn feeds_stdin_text() {
    sluice()
        .args(["run", "--stdin", "text:abc", "--stdout", "capture", "--", "cat"])
        .assert()
        .success()
        .stdout("abc");
}

#[test]
fn forwards_parent_stdin_as_a_source() {
    sluice()
        .args(["run", "--stdin", "text:1 ", "--stdin", "-", "--stdin-mode", "merge", "--stdout", "capture", "--", "cat"])
        .write_stdin("2")
        .assert()
        .success()
        .stdout("1 2");
}

#[test]
fn exits_with_the_child_code() {
    sluice()
        .args(["run", "--", "/bin/sh", "-c", "exit 4"])
        .assert()
        .code(4);
}

#[test]
fn fail_loudly_still_exits_with_the_child_code() {
    sluice()
        .args(["run", "--fail-loudly", "--stdout", "capture", "--", "/bin/sh", "-c", "echo why; exit 2"])
        .assert()
        .code(2)
        .stdout("why\n");
}

#[test]
fn writes_files_relative_to_cwd() {
    let dir = TempDir::new().unwrap();
    sluice()
        .args(["run", "--out", "overwrite:both.log", "--", "/bin/sh", "-c", "echo a; echo b >&2"])
        .env("SLUICE_CWD", dir.path())
        .assert()
        .success();

    let text = std::fs::read_to_string(dir.path().join("both.log")).unwrap();
    assert_eq!(text.lines().count(), 2);
}

#[test]
fn json_outcome() {
    sluice()
        .args(["run", "--json", "--stdout", "capture", "--", "/bin/sh", "-c", "printf ok"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"code\": 0").and(predicate::str::contains("\"text\": \"ok\"")));
}

#[test]
fn bare_path_sink_is_rejected() {
    sluice()
        .args(["run", "--stdout", "out.txt", "--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bare path"));
}

#[test]
fn partial_timeout_is_rejected() {
    sluice()
        .args(["run", "--timeout-grace-ms", "100", "--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid timeout"));
}

#[test]
fn timeout_kills_a_stubborn_child() {
    sluice()
        .args([
            "run",
            "--timeout-grace-ms",
            "100",
            "--timeout-force-ms",
            "100",
            "--",
            "/bin/sh",
            "-c",
            "trap '' INT; exec sleep 10",
        ])
        .assert()
        .code(137);
}
