use std::process::Command;

use crate::common::{assert_contains, init_test_logging};

#[test]
fn test_converge_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_converge_help_includes_description");

    let output = Command::new(env!("CARGO_BIN_EXE_converge"))
        .arg("--help")
        .output()
        .expect("Failed to run converge --help");

    assert!(output.status.success(), "converge --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_contains(&stdout, "Poll a command");
    assert_contains(&stdout, "wait");
    crate::test_log!("TEST PASS: test_converge_help_includes_description");
}

#[test]
fn test_wait_help_lists_exit_status() {
    init_test_logging();
    crate::test_log!("TEST START: test_wait_help_lists_exit_status");

    let output = Command::new(env!("CARGO_BIN_EXE_converge"))
        .args(["wait", "--help"])
        .output()
        .expect("Failed to run converge wait --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "--expect-condition");
    assert_contains(&stdout, "--clean-regex");
    assert_contains(&stdout, "Exit status");
    crate::test_log!("TEST PASS: test_wait_help_lists_exit_status");
}

#[test]
fn test_wait_without_condition_is_usage_error() {
    init_test_logging();

    let output = Command::new(env!("CARGO_BIN_EXE_converge"))
        .args(["wait", "--", "true"])
        .output()
        .expect("Failed to run converge wait");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "required");
}

#[test]
fn test_invalid_environment_is_reported() {
    init_test_logging();
    crate::test_log!("TEST START: test_invalid_environment_is_reported");

    let output = Command::new(env!("CARGO_BIN_EXE_converge"))
        .env("CONVERGE_POLL_INTERVAL", "often")
        .args(["wait", "--contains-any", "x", "--", "true"])
        .output()
        .expect("Failed to run converge wait");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "CONVERGE_POLL_INTERVAL");
    crate::test_log!("TEST PASS: test_invalid_environment_is_reported");
}
