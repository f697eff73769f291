//! Shared test infrastructure for integration tests.

use std::path::Path;
use std::process::{Command, Output};

/// Run the casebook binary with the given arguments in `cwd`.
pub fn run_casebook(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_casebook"))
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn casebook")
}

#[allow(dead_code)]
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[allow(dead_code)]
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
