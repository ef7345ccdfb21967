//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Isolated home and working directory so no user config is picked up
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("chatlink").unwrap();
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join(".config"))
            .env_remove("CHATLINK_CONFIG")
            .env_remove("CHATLINK_CHANNEL")
            .env_remove("CHATLINK_TOKEN")
            .env_remove("CHATLINK_ORIGIN")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Write a config whose state lives inside the sandbox
    fn config(&self, extra: &str) -> PathBuf {
        let path = self.dir.path().join("chatlink.toml");
        let state_dir = self.dir.path().join("state");
        fs::write(
            &path,
            format!(
                "[storage]\nstate_dir = \"{}\"\n\n{}",
                state_dir.display().to_string().replace('\\', "/"),
                extra
            ),
        )
        .unwrap();
        path
    }
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    Sandbox::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("scope"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_version_command() {
    Sandbox::new()
        .cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("chatlink "))
        .stdout(predicate::str::contains("target:"))
        .stdout(predicate::str::contains("profile:"));
}

#[test]
fn test_short_version_flag() {
    Sandbox::new()
        .cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chatlink"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    Sandbox::new()
        .cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[endpoint]"))
        .stdout(predicate::str::contains("[reconnect]"))
        .stdout(predicate::str::contains("[heartbeat]"))
        .stdout(predicate::str::contains("[fallback]"))
        .stdout(predicate::str::contains("https://chat.example.com"));
}

#[test]
fn test_config_validate_default() {
    Sandbox::new()
        .cmd()
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    Sandbox::new()
        .cmd()
        .args(["config", "validate", "--config", "/nonexistent/path/config.toml"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("E100"))
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_init_help() {
    Sandbox::new()
        .cmd()
        .args(["config", "init", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--path"))
        .stdout(predicate::str::contains("--force"));
}

// ─────────────────────────────────────────────────────────────────
// Scope Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_scope_select_show_clear() {
    let sandbox = Sandbox::new();
    let config = sandbox.config("");

    sandbox
        .cmd()
        .args(["scope", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("(none)"));

    sandbox
        .cmd()
        .args(["scope", "select", "proj-7", "--config"])
        .arg(&config)
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["scope", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("proj-7"));

    let state = fs::read_to_string(sandbox.dir.path().join("state").join("state.json")).unwrap();
    assert!(state.contains("\"selected_scope\""));

    sandbox
        .cmd()
        .args(["scope", "clear", "--config"])
        .arg(&config)
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["scope", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("(none)"));
}

// ─────────────────────────────────────────────────────────────────
// Run Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_help() {
    Sandbox::new()
        .cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--channel"))
        .stdout(predicate::str::contains("--scope"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_run_requires_channel() {
    Sandbox::new().cmd().arg("run").assert().failure();
}

#[test]
fn test_run_with_invalid_config() {
    Sandbox::new()
        .cmd()
        .args(["run", "--channel", "c1", "--config", "/nonexistent/config.toml"])
        .assert()
        .failure();
}

#[test]
fn test_run_rejects_bad_origin() {
    Sandbox::new()
        .cmd()
        .args(["run", "--channel", "c1", "--origin", "ftp://example.com"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("origin must start with"));
}

#[test]
fn test_run_without_credential_fails() {
    let sandbox = Sandbox::new();
    let config = sandbox.config("[reconnect]\nmax_attempts = 1\n");

    sandbox
        .cmd()
        .args(["run", "--channel", "c1", "--origin", "http://127.0.0.1:1", "--config"])
        .arg(&config)
        .write_stdin("")
        .assert()
        .code(40)
        .stderr(predicate::str::contains("E402"));
}

#[test]
fn test_run_unreachable_server_falls_back_and_exits_on_eof() {
    let sandbox = Sandbox::new();
    let config = sandbox.config("[auth]\ntoken = \"t\"\n\n[reconnect]\nmax_attempts = 1\n");

    sandbox
        .cmd()
        .args(["-q", "run", "--channel", "c1", "--origin", "http://127.0.0.1:1", "--config"])
        .arg(&config)
        .write_stdin("")
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Verbosity and Error Handling Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flags() {
    Sandbox::new().cmd().args(["-v", "version"]).assert().success();
    Sandbox::new().cmd().args(["-vv", "version"]).assert().success();
    Sandbox::new().cmd().args(["--quiet", "version"]).assert().success();
}

#[test]
fn test_unknown_command() {
    Sandbox::new()
        .cmd()
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_subcommand() {
    Sandbox::new().cmd().assert().failure();
}
