//! Integration tests for configuration resolution through the CLI.

mod common;

use common::{run_casebook, stdout};
use std::fs;

#[test]
fn generate_config_emits_resolved_toml_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_casebook(
        dir.path(),
        &[
            "generate-config",
            "--course",
            "csc108",
            "--assignment",
            "a1",
            "--similarity-user-id",
            "123456",
        ],
    );

    assert!(output.status.success(), "stderr: {}", common::stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("course = \"csc108\""), "got: {text}");
    assert!(text.contains("assignment = \"a1\""), "got: {text}");
    assert!(text.contains("similarity_user_id = 123456"), "got: {text}");
    // Defaults are materialized so the emitted file is self-contained.
    assert!(text.contains("file_glob = \"**/*\""), "got: {text}");
}

#[test]
fn generate_config_writes_a_loadable_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_casebook(
        dir.path(),
        &["generate-config", "casebook.toml", "--course", "csc108"],
    );
    assert!(output.status.success(), "stderr: {}", common::stderr(&output));

    // The emitted file round-trips as the base layer of a later run.
    let second = run_casebook(dir.path(), &["generate-config", "--assignment", "a2"]);
    assert!(second.status.success());
    let text = stdout(&second);
    assert!(text.contains("course = \"csc108\""), "got: {text}");
    assert!(text.contains("assignment = \"a2\""), "got: {text}");
}

#[test]
fn cli_overrides_win_over_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("casebook.toml"),
        "course = \"csc108\"\nassignment = \"a1\"\n",
    )
    .unwrap();

    let output = run_casebook(
        dir.path(),
        &["generate-config", "--assignment", "a9"],
    );
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("assignment = \"a9\""), "got: {text}");
    assert!(text.contains("course = \"csc108\""), "got: {text}");
}
