//! Embeds build metadata (git revision, timestamp, target, profile) into
//! the binary as `CHATLINK_*` compile-time variables.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let git_dirty = match git(&["status", "--porcelain"]) {
        Some(out) if !out.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };
    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    println!("cargo:rustc-env=CHATLINK_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=CHATLINK_GIT_DIRTY={}", git_dirty);
    println!("cargo:rustc-env=CHATLINK_BUILD_TIMESTAMP={}", timestamp);
    println!("cargo:rustc-env=CHATLINK_TARGET={}", var_or_unknown("TARGET"));
    println!("cargo:rustc-env=CHATLINK_PROFILE={}", var_or_unknown("PROFILE"));
}

fn var_or_unknown(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| "unknown".to_string())
}

/// Trimmed stdout of a successful git command
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}
