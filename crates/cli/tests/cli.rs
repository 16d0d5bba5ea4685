//! Integration tests for the `tacitus` binary: runs it as a subprocess
//! against both a source file and an inline `--eval` string.

use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tacitus"))
}

#[test]
fn runs_a_source_file_and_prints_the_final_stack() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "1 2 +").unwrap();

    let output = bin().arg(file.path()).output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap().trim(), "3");
}

#[test]
fn runs_an_inline_eval_string() {
    let output = bin().arg("--eval").arg(": sq dup * ; 4 sq").output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap().trim(), "16");
}

#[test]
fn reports_a_nonzero_exit_and_message_on_compile_error() {
    let output = bin().arg("--eval").arg("1 if `a").output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr).unwrap().contains("error"));
}

#[test]
fn rejects_both_a_file_and_eval_at_once() {
    let file = NamedTempFile::new().unwrap();
    let output = bin().arg(file.path()).arg("--eval").arg("1").output().unwrap();
    assert!(!output.status.success());
}
