//! CLI Integration Tests
//!
//! These tests run the `fieldops` binary end-to-end against its in-memory
//! platform. They test the wiring between the CLI and the core library.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

// ============================================================================
// Test Utilities
// ============================================================================

fn cli_cmd() -> Command {
    Command::cargo_bin("fieldops").expect("Failed to find fieldops binary")
}

/// Write a JSON config file that lives as long as the returned handle
fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

/// Short profile timeouts so retry scenarios finish quickly
fn fast_session_config() -> NamedTempFile {
    config_file(
        r#"{
            "session": {
                "initial_fetch_timeout_ms": 200,
                "retry_fetch_timeout_ms": 100,
                "retry_backoff_ms": 20
            }
        }"#,
    )
}

// ============================================================================
// Config Command Tests
// ============================================================================

#[test]
fn test_config_prints_defaults() {
    cli_cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"initial_fetch_timeout_ms\": 15000"))
        .stdout(predicate::str::contains("\"retry_fetch_timeout_ms\": 5000"))
        .stdout(predicate::str::contains("\"max_attempts\": 3"))
        .stdout(predicate::str::contains("\"remembered_ids\": 1024"));
}

#[test]
fn test_config_file_overrides_and_keeps_defaults() {
    let file = config_file(r#"{ "session": { "max_attempts": 5 } }"#);

    cli_cmd()
        .arg("--config")
        .arg(file.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_attempts\": 5"))
        .stdout(predicate::str::contains("\"initial_fetch_timeout_ms\": 15000"));
}

#[test]
fn test_invalid_config_rejected() {
    let file = config_file(r#"{ "session": { "max_attempts": 0 } }"#);

    cli_cmd()
        .arg("--config")
        .arg(file.path())
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_attempts"));
}

#[test]
fn test_missing_config_file_rejected() {
    cli_cmd()
        .args(["--config", "/nonexistent/fieldops.json", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

// ============================================================================
// Session Command Tests
// ============================================================================

#[test]
fn test_session_login_succeeds() {
    cli_cmd()
        .arg("session")
        .assert()
        .success()
        .stdout(predicate::str::contains("-> Authenticating"))
        .stdout(predicate::str::contains("ProfileLoading(officer-1, attempt 1)"))
        .stdout(predicate::str::contains("Final: Authenticated(officer-1, officer)"))
        .stdout(predicate::str::contains("Profile fetches: 1"))
        .stdout(predicate::str::contains("After logout: Unauthenticated"));
}

#[test]
fn test_session_recovers_after_timeouts() {
    let config = fast_session_config();

    cli_cmd()
        .arg("--config")
        .arg(config.path())
        .args(["session", "--timeouts", "2", "--latency-ms", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ProfileLoading(officer-1, attempt 2)"))
        .stdout(predicate::str::contains("ProfileLoading(officer-1, attempt 3)"))
        .stdout(predicate::str::contains("Final: Authenticated(officer-1, officer)"))
        .stdout(predicate::str::contains("Profile fetches: 3"));
}

#[test]
fn test_session_gives_up_after_three_timeouts() {
    let config = fast_session_config();

    cli_cmd()
        .arg("--config")
        .arg(config.path())
        .args(["session", "--timeouts", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Final: ProfileFailed(officer-1: profile fetch timed out after 3 attempts)",
        ));
}

#[test]
fn test_session_missing_profile() {
    cli_cmd()
        .args(["session", "--not-found"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no profile exists for this account"))
        .stdout(predicate::str::contains("Role:").not());
}

// ============================================================================
// Chat Command Tests
// ============================================================================

#[test]
fn test_chat_send_and_reconcile() {
    cli_cmd()
        .args(["chat", "--topic", "case-42", "On my way", "ETA 5 min"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Opened topic_case-42 (1 in history)"))
        .stdout(predicate::str::contains("[You] On my way"))
        .stdout(predicate::str::contains("[dispatch] Copy that"))
        .stdout(predicate::str::contains("Messages: 4"))
        .stdout(predicate::str::contains("Unread: 2"))
        .stdout(predicate::str::contains("Unread after mark_read: 0"));
}

#[test]
fn test_chat_fail_first_then_resend() {
    cli_cmd()
        .args(["chat", "--fail-first", "Need backup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("resent  Need backup -> msg-"))
        .stdout(predicate::str::contains("Messages: 3"))
        .stdout(predicate::str::contains("(failed)").not());
}

#[test]
fn test_chat_requires_messages() {
    cli_cmd().arg("chat").assert().failure();
}

// ============================================================================
// Alert Command Tests
// ============================================================================

#[test]
fn test_alerts_acknowledged_in_order() {
    cli_cmd()
        .args(["alert", "--count", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Active: [emergency_alert] Alert 1"))
        .stdout(predicate::str::contains("Queued: 2"))
        .stdout(predicate::str::contains("acknowledge alert-3 -> true"))
        .stdout(predicate::str::contains("Blocking: false"))
        .stdout(predicate::str::contains("Navigations: 3"));
}

#[test]
fn test_double_acknowledge_navigates_once() {
    cli_cmd()
        .args(["alert", "--count", "2", "--double-ack"])
        .assert()
        .success()
        .stdout(predicate::str::contains("acknowledge alert-1 -> true"))
        .stdout(predicate::str::contains("acknowledge alert-1 -> false"))
        .stdout(predicate::str::contains("Navigations: 2"));
}

#[test]
fn test_zero_alerts() {
    cli_cmd()
        .args(["alert", "--count", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No interrupts raised"));
}
