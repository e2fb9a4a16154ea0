//! CLI tests that run the `admit` binary against temporary configs.
//!
//! None of these reach the network: the embedding provider is disabled or
//! the command fails before any request is made.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn admit_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_admit"))
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("docs")).unwrap();

    let config_content = format!(
        r#"[index]
path = "{root}/data/embeddings.json"

[corpus]
markdown_path = "{root}/docs/guidelines.md"

[embedding]
provider = "disabled"

[logs]
dir = "{root}/logs"
{extra}
"#,
        root = root.display(),
        extra = extra
    );

    let config_path = config_dir.join("admit.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_admit(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = admit_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run admit binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env("");
    let (stdout, _stderr, success) = run_admit(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_without_index_fails() {
    let (_tmp, config_path) = setup_test_env("");
    let (_stdout, stderr, success) = run_admit(&config_path, &["search", "cellulitis"]);
    assert!(!success);
    assert!(stderr.contains("Embeddings not found"), "stderr: {stderr}");
}

#[test]
fn test_ingest_missing_markdown() {
    let (_tmp, config_path) = setup_test_env("");
    let (_stdout, stderr, success) = run_admit(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("Markdown not found"), "stderr: {stderr}");
}

#[test]
fn test_ingest_failure_writes_no_snapshot() {
    let (tmp, config_path) = setup_test_env("");
    fs::write(
        tmp.path().join("docs/guidelines.md"),
        "# Cardiology\n\nChest pain with positive troponin.\n",
    )
    .unwrap();

    let (_stdout, stderr, success) = run_admit(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {stderr}");
    assert!(!tmp.path().join("data/embeddings.json").exists());
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env("[chunking]\nchunk_size = 0\n");
    let (_stdout, stderr, success) = run_admit(&config_path, &["search", "x"]);
    assert!(!success);
    assert!(stderr.contains("chunk_size"), "stderr: {stderr}");
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _stderr, success) = run_admit(&tmp.path().join("absent.toml"), &["search", ""]);
    assert!(success);
    assert!(stdout.contains("No results."));
}
