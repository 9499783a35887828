//! CLI subprocess integration tests.
//!
//! These tests invoke the `vmclone` binary as a subprocess and verify exit
//! codes and output. The mock client starts with no domains defined, so
//! every domain lookup fails; that still exercises argument parsing, client
//! selection, and the error-to-exit-code mapping end to end.

use std::process::Command;

fn vmclone_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vmclone"))
}

#[test]
fn no_arguments_is_a_usage_error() {
    let output = vmclone_bin().output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn default_connect_reports_missing_binding() {
    let output = vmclone_bin().args(["plan", "guest"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not available"), "stderr: {stderr}");
}

#[test]
fn plan_unknown_domain_fails_with_domain_error() {
    let output = vmclone_bin()
        .args(["-c", "mock:///system", "plan", "ghost"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ghost"), "stderr: {stderr}");
}

#[test]
fn clone_unknown_domain_fails() {
    let dest = tempfile::tempdir().unwrap();
    let locks = tempfile::tempdir().unwrap();
    let output = vmclone_bin()
        .args(["-c", "mock:///system"])
        .arg("--lockdir")
        .arg(locks.path())
        .args(["clone", "ghost"])
        .arg(dest.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn clone_dry_run_does_not_need_a_lockdir() {
    let dest = tempfile::tempdir().unwrap();
    let output = vmclone_bin()
        .args(["-c", "mock:///system", "clone", "--dry-run", "ghost"])
        .arg(dest.path())
        .output()
        .unwrap();
    // Still fails on the unknown domain, but before any locking.
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn completions_generate_for_bash() {
    let output = vmclone_bin()
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vmclone"));
}

#[test]
fn json_flag_keeps_errors_on_stderr() {
    let output = vmclone_bin()
        .args(["--json", "-c", "mock:///system", "plan", "ghost"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}
