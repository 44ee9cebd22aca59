//! CLI integration tests

use std::process::{Command, Output};

fn drift(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_drift"))
        .args(args)
        .env_remove("DRIFT_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = drift(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Drift"), "Should show app name");
    for command in [
        "tick",
        "status",
        "health",
        "mode",
        "scenarios",
        "recommendations",
        "approve",
        "reject",
        "snooze",
        "schedule",
        "execute",
        "policy",
        "config",
    ] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = drift(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("drift"), "Should show binary name");
}

#[test]
fn test_tick_help() {
    let output = drift(&["tick", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--mode"), "Should show mode option");
    assert!(stdout.contains("manual"), "Should list manual mode");
    assert!(stdout.contains("automated"), "Should list automated mode");
}

#[test]
fn test_recommendations_list_help() {
    let output = drift(&["recommendations", "list", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--status"), "Should show status option");
}

#[test]
fn test_snooze_help() {
    let output = drift(&["snooze", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--until"), "Should show until option");
}

#[test]
fn test_policy_set_help() {
    let output = drift(&["policy", "set", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("auto-safe"), "Should list auto-safe policy");
    assert!(stdout.contains("recommend-only"), "Should list recommend-only policy");
    assert!(stdout.contains("ignore"), "Should list ignore policy");
}

/// Test format option
#[test]
fn test_format_option() {
    let output = drift(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
}

/// Test api-url option
#[test]
fn test_api_url_option() {
    let output = drift(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("DRIFT_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = drift(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test missing required argument error handling
#[test]
fn test_missing_argument() {
    let output = drift(&["approve"]);

    assert!(!output.status.success(), "Missing argument should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}

#[test]
fn test_invalid_mode_rejected() {
    let output = drift(&["mode", "set", "yolo"]);

    assert!(!output.status.success(), "Unknown mode should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid value"), "Should reject the value");
}

#[test]
fn test_unreachable_agent_fails() {
    let output = drift(&["--api-url", "http://127.0.0.1:1", "status"]);

    assert!(!output.status.success(), "Status without an agent should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}
