//! End-to-end tests that invoke the compiled `db-catalyst` binary as a
//! subprocess, exercising CLI parsing, config loading, exit codes, and the
//! files left on disk.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_db-catalyst"))
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(binary_path())
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to execute db-catalyst binary")
}

/// Lay out a minimal valid project and return its root.
fn write_project(dir: &Path) {
    std::fs::create_dir_all(dir.join("schema")).unwrap();
    std::fs::create_dir_all(dir.join("queries")).unwrap();
    std::fs::write(
        dir.join("db-catalyst.toml"),
        "package = \"db\"\nout = \"gen\"\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("schema/users.sql"),
        "CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("queries/users.sql"),
        "-- name: GetUser :one\nSELECT id, name, email FROM users WHERE id = ?1;\n",
    )
    .unwrap();
}

#[test]
fn test_exit_0_and_files_written() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());

    let output = run_in(tmp.path(), &[]);
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(tmp.path().join("gen/models.go").exists());
    assert!(tmp.path().join("gen/db.go").exists());
    assert!(tmp.path().join("gen/users.sql.go").exists());
}

#[test]
fn test_exit_1_on_diagnostic_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());
    // Second definition of the same table in another schema file.
    std::fs::write(
        tmp.path().join("schema/zz_dup.sql"),
        "CREATE TABLE users(id INTEGER);\n",
    )
    .unwrap();

    let output = run_in(tmp.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already defined"), "{stderr}");
    assert!(stderr.contains("[error]"), "{stderr}");
}

#[test]
fn test_exit_1_on_missing_config() {
    let tmp = tempfile::tempdir().unwrap();
    let output = run_in(tmp.path(), &["--config", "nope.toml"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_dry_run_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());

    let output = run_in(tmp.path(), &["--dry-run"]);
    assert!(output.status.success());
    assert!(!tmp.path().join("gen").exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("models.go"), "{stdout}");
}

#[test]
fn test_list_queries_prints_signatures() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());

    let output = run_in(tmp.path(), &["--list-queries"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("GetUser :one"), "{stdout}");
    assert!(stdout.contains("arg1: integer"), "{stdout}");
    assert!(stdout.contains("email text?"), "{stdout}");
    assert!(!tmp.path().join("gen").exists(), "list-queries must not write");
}

#[test]
fn test_list_queries_json() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());

    let output = run_in(tmp.path(), &["--list-queries", "--json"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON listing");
    assert_eq!(parsed[0]["name"], "GetUser");
    assert_eq!(parsed[0]["command"], "one");
    assert_eq!(parsed[0]["params"][0]["semantic_type"], "Integer");
}

#[test]
fn test_sql_before_marker_fails_with_position() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());
    std::fs::write(
        tmp.path().join("queries/bad.sql"),
        "SELECT 1;\n-- name: X :one\nSELECT id FROM users;\n",
    )
    .unwrap();

    let output = run_in(tmp.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bad.sql:1:1"), "{stderr}");
}

#[test]
fn test_strict_config_escalates_unknown_key() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());
    std::fs::write(
        tmp.path().join("db-catalyst.toml"),
        "package = \"db\"\nout = \"gen\"\nmystery = true\n",
    )
    .unwrap();

    let relaxed = run_in(tmp.path(), &[]);
    assert!(relaxed.status.success());
    let stderr = String::from_utf8_lossy(&relaxed.stderr);
    assert!(stderr.contains("mystery"), "{stderr}");
    assert!(stderr.contains("[warning]"), "{stderr}");

    let strict = run_in(tmp.path(), &["--strict-config"]);
    assert_eq!(strict.status.code(), Some(1));
}

#[test]
fn test_rerun_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());

    assert!(run_in(tmp.path(), &[]).status.success());
    let first = std::fs::metadata(tmp.path().join("gen/models.go"))
        .unwrap()
        .modified()
        .unwrap();

    assert!(run_in(tmp.path(), &[]).status.success());
    let second = std::fs::metadata(tmp.path().join("gen/models.go"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(first, second, "identical rerun must not rewrite files");
}

#[test]
fn test_out_override() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());

    let output = run_in(tmp.path(), &["--out", "generated"]);
    assert!(output.status.success());
    assert!(tmp.path().join("generated/models.go").exists());
    assert!(!tmp.path().join("gen").exists());
}

#[test]
fn test_no_json_tags_flag() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path());

    assert!(run_in(tmp.path(), &["--no-json-tags"]).status.success());
    let models = std::fs::read_to_string(tmp.path().join("gen/models.go")).unwrap();
    assert!(!models.contains("`json:"), "{models}");
}

#[test]
fn test_help_exits_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let output = run_in(tmp.path(), &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--dry-run"));
    assert!(stdout.contains("--list-queries"));
}
