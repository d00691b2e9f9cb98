#![cfg(unix)]

mod common;

use common::{CF_CASES, FakeClis};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn register(fakes: &FakeClis) -> assert_cmd::Command {
    let mut cmd = fakes.cmd();
    cmd.args(["register-segment", "--name", "iso-one"]);
    cmd
}

#[test]
fn register_without_flags_respects_rust_log_info() {
    let fakes = FakeClis::new().tool("cf", CF_CASES);

    register(&fakes)
        .env("RUST_LOG", "info")
        .assert()
        .success()
        .stderr(predicate::str::contains("already registered"));
}

#[test]
fn register_without_flags_respects_rust_log_warn() {
    let fakes = FakeClis::new().tool("cf", CF_CASES);

    register(&fakes)
        .env("RUST_LOG", "warn")
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}

#[test]
fn verbose_overrides_rust_log_warn() {
    let fakes = FakeClis::new().tool("cf", CF_CASES);

    register(&fakes)
        .env("RUST_LOG", "warn")
        .arg("-v")
        .assert()
        .success()
        .stderr(predicate::str::contains("already registered"))
        .stderr(predicate::str::contains("Running cf").not());
}

#[test]
fn verbose_debug_logs_every_invocation() {
    let fakes = FakeClis::new().tool("cf", CF_CASES);

    register(&fakes)
        .env("RUST_LOG", "warn")
        .arg("-vv")
        .assert()
        .success()
        .stderr(predicate::str::contains("Running cf isolation-segments"));
}

#[test]
fn log_level_overrides_rust_log_warn() {
    let fakes = FakeClis::new().tool("cf", CF_CASES);

    register(&fakes)
        .env("RUST_LOG", "warn")
        .args(["--log-level", "info"])
        .assert()
        .success()
        .stderr(predicate::str::contains("already registered"));
}

#[test]
fn trace_log_level_emits_debug_messages() {
    let fakes = FakeClis::new().tool("cf", CF_CASES);

    register(&fakes)
        .env("RUST_LOG", "warn")
        .args(["--log-level", "trace"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Running cf target"));
}

#[test]
fn log_level_conflicts_with_verbose() {
    FakeClis::new()
        .cmd()
        .args(["--log-level", "info", "-v", "validate", "--segment", "iso-one"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--log-level <LEVEL>"))
        .stderr(predicate::str::contains("--verbose"));
}

#[test]
fn help_mentions_rust_log_precedence_for_logging_flags() {
    FakeClis::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("-v, --verbose"))
        .stdout(predicate::str::contains("--log-level <LEVEL>"))
        .stdout(predicate::str::contains("Takes precedence over RUST_LOG"));
}

#[test]
fn log_file_receives_plain_logs() {
    let fakes = FakeClis::new().tool("cf", CF_CASES);
    let temp = TempDir::new().unwrap();
    let log_file = temp.path().join("isoseg.log");

    register(&fakes)
        .arg("-v")
        .arg("--log-file")
        .arg(&log_file)
        .assert()
        .success();

    let logged = fs::read_to_string(&log_file).unwrap();
    assert!(logged.contains("INFO: Isolation segment iso-one is already registered"), "{logged}");
    assert!(!logged.contains('\u{1b}'), "log file should not contain ANSI escapes");
}

#[test]
fn failed_command_logs_to_stderr_not_stdout() {
    let fakes = FakeClis::new().tool(
        "cf",
        "  \"isolation-segments\") echo 'Server error, status code: 503' ; exit 1 ;;",
    );

    fakes
        .cmd()
        .args(["register-segment", "--name", "iso-one"])
        .assert()
        .code(255)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("`cf isolation-segments` failed (exit code 1)"))
        .stderr(predicate::str::contains("503"));
}

#[test]
fn warn_error_emojis_suppressed_when_not_tty() {
    let fakes = FakeClis::new().tool(
        "cf",
        "  \"isolation-segments\") echo 'Server error' >&2 ; exit 1 ;;",
    );

    // capture() makes stdout/stderr non-tty
    let output = fakes
        .cmd()
        .args(["register-segment", "--name", "iso-one"])
        .assert()
        .failure()
        .get_output()
        .clone();

    let stderr = String::from_utf8_lossy(&output.stderr);

    // Should not include emoji prefixes when not a TTY
    for ch in stderr.chars() {
        assert!(
            ch.is_ascii(),
            "stderr unexpectedly contains non-ASCII character: {ch:?}"
        );
    }
    assert!(
        stderr.contains("ERROR:"),
        "stderr should include the error prefix"
    );
    assert!(
        stderr.contains("Server error"),
        "stderr should include the error message"
    );
}
