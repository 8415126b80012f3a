//! CLI smoke tests for the `atrac` binary.

use assert_cmd::Command;
use predicates::prelude::*;

const SOURCE: &str = "function add(a, b: f64): f64 begin add := a + b end\n";

fn write_source(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("add.atra");
    std::fs::write(&path, SOURCE).unwrap();
    path
}

#[test]
fn test_dump_prints_magic() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_source(&dir);

    Command::cargo_bin("atrac")
        .unwrap()
        .args(["dump"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("00 61 73 6d 01 00 00 00"));
}

#[test]
fn test_build_writes_wasm() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_source(&dir);
    let output = dir.path().join("out.wasm");

    Command::cargo_bin("atrac")
        .unwrap()
        .args(["build"])
        .arg(&input)
        .args(["-o"])
        .arg(&output)
        .assert()
        .success();

    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(&bytes[0..4], b"\0asm");
}

#[test]
fn test_build_default_output_path() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_source(&dir);

    Command::cargo_bin("atrac")
        .unwrap()
        .args(["build"])
        .arg(&input)
        .assert()
        .success();

    assert!(dir.path().join("add.wasm").exists());
}

#[test]
fn test_tokens_lists_stream() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_source(&dir);

    Command::cargo_bin("atrac")
        .unwrap()
        .args(["tokens"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Keyword(Function)"));
}

#[test]
fn test_ast_prints_program() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_source(&dir);

    Command::cargo_bin("atrac")
        .unwrap()
        .args(["ast"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("FuncDecl"));
}

#[test]
fn test_syntax_error_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.atra");
    std::fs::write(&path, "function f(x: f64): f64 begin f := end\n").unwrap();

    Command::cargo_bin("atrac")
        .unwrap()
        .args(["build"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("syntax error"));
}

#[test]
fn test_missing_file_is_reported() {
    Command::cargo_bin("atrac")
        .unwrap()
        .args(["dump", "/nonexistent/nope.atra"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}
