use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::common::{StateFile, assert_contains, assert_exit_code, init_test_logging};

fn converge() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_converge"));
    cmd.env_remove("RUST_LOG").arg("wait");
    cmd
}

#[test]
fn test_wait_succeeds_against_echo() {
    init_test_logging();
    crate::test_log!("TEST START: test_wait_succeeds_against_echo");

    let output = converge()
        .args(["--immediate", "--interval", "1s", "--timeout", "10s"])
        .args(["--contains-any", "hello", "--", "echo", "hello"])
        .output()
        .expect("Failed to run converge wait");

    assert_exit_code(&output, 0);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "[OK] echo hello: satisfied after 1 attempt");
    crate::test_log!("TEST PASS: test_wait_succeeds_against_echo");
}

#[test]
fn test_wait_times_out_against_echo() {
    init_test_logging();
    crate::test_log!("TEST START: test_wait_times_out_against_echo");

    let output = converge()
        .args(["--interval", "100ms", "--timeout", "500ms"])
        .args(["--contains-any", "ready", "--", "echo", "pending"])
        .output()
        .expect("Failed to run converge wait");

    assert_exit_code(&output, 2);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "[FAILED]");
    assert_contains(&stdout, "last snapshot: pending");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "timed out");
    crate::test_log!("TEST PASS: test_wait_times_out_against_echo");
}

#[test]
fn test_json_report_for_condition_map() {
    init_test_logging();

    let output = converge()
        .args(["--immediate", "--json", "-d", "etcd operator"])
        .args(["--expect-condition", "Available=True", "--expect-condition", "Degraded=False"])
        .args(["--", "echo Available=True,Progressing=False,Degraded=False"])
        .output()
        .expect("Failed to run converge wait");

    assert_exit_code(&output, 0);
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report is not JSON");
    assert_eq!(report["description"], "etcd operator");
    assert_eq!(report["succeeded"], true);
    assert_eq!(report["terminal_reason"], "satisfied");
    assert_eq!(report["attempts"], 1);
}

#[test]
fn test_wait_observes_state_change() {
    init_test_logging();
    crate::test_log!("TEST START: test_wait_observes_state_change");

    let state = StateFile::new("Available=True Progressing=True\n");
    let child = converge()
        .args(["--immediate", "--interval", "100ms", "--timeout", "20s", "--json"])
        .args(["--expect-condition", "Available=True,Progressing=False"])
        .args(["--", &state.cat_command()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn converge wait");

    thread::sleep(Duration::from_millis(500));
    state.set("Available=True Progressing=False\n");

    let output = child.wait_with_output().expect("Failed to wait for converge");
    assert_exit_code(&output, 0);
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report is not JSON");
    assert!(report["attempts"].as_u64().unwrap() > 1, "{report}");
    crate::test_log!("TEST PASS: test_wait_observes_state_change");
}

#[test]
fn test_expect_never_passes_on_quiet_timeout() {
    init_test_logging();

    let output = converge()
        .args(["--expect-never", "--interval", "100ms", "--timeout", "300ms"])
        .args(["--contains-any", "panic:", "--", "echo", "all good"])
        .output()
        .expect("Failed to run converge wait");

    assert_exit_code(&output, 0);
}

#[test]
fn test_expect_never_fails_when_condition_holds() {
    init_test_logging();

    let output = converge()
        .args(["--expect-never", "--immediate", "--timeout", "5s"])
        .args(["--contains-any", "panic:", "--", "echo", "panic: nil map"])
        .output()
        .expect("Failed to run converge wait");

    assert_exit_code(&output, 5);
}

#[test]
fn test_fail_fast_on_failing_command() {
    init_test_logging();

    let output = converge()
        .args(["--fail-fast", "--immediate", "--timeout", "5s"])
        .args(["--contains-any", "ready", "--", "false"])
        .output()
        .expect("Failed to run converge wait");

    assert_exit_code(&output, 3);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "reason:");
}

#[test]
fn test_clean_regex_with_diagnostics() {
    init_test_logging();
    crate::test_log!("TEST START: test_clean_regex_with_diagnostics");

    let output = converge()
        .args(["--interval", "100ms", "--timeout", "300ms"])
        .args(["--clean-regex", "^openshift-", "--exclude", "Running|Completed"])
        .args(["--diagnose", "echo describe-output"])
        .args(["--", "printf 'openshift-etcd Running\\nopenshift-apiserver CrashLoopBackOff\\n'"])
        .output()
        .expect("Failed to run converge wait");

    assert_exit_code(&output, 2);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "diagnostic `diagnose-1`");
    assert_contains(&stdout, "describe-output");
    crate::test_log!("TEST PASS: test_clean_regex_with_diagnostics");
}

#[test]
fn test_background_failure_fails_wait() {
    init_test_logging();

    let output = converge()
        .args(["--interval", "500ms", "--timeout", "5s"])
        .args(["--background", "echo injector crashed >&2; exit 7"])
        .args(["--contains-any", "hello", "--", "echo", "hello"])
        .output()
        .expect("Failed to run converge wait");

    assert_exit_code(&output, 4);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "task error: background-1");
    assert_contains(&stdout, "injector crashed");
}
