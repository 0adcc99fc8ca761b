//! CLI integration tests for the commands that need no model runtime.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn gqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("gqa");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/grounded.sqlite"
"#,
        root.display()
    );

    let config_path = config_dir.join("grounded.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_gqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = gqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--events")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run gqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_gqa(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_gqa(&config_path, &["init"]);
    assert!(first, "first init failed");

    let (_, _, second) = run_gqa(&config_path, &["init"]);
    assert!(second, "second init failed (not idempotent)");
}

#[test]
fn status_on_empty_corpus() {
    let (_tmp, config_path) = setup_test_env();

    run_gqa(&config_path, &["init"]);
    let (stdout, _, success) = run_gqa(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("documents: 0"));
    assert!(stdout.contains("chunks: 0"));
}

#[test]
fn export_empty_corpus_is_valid_version_1() {
    let (_tmp, config_path) = setup_test_env();

    run_gqa(&config_path, &["init"]);
    let (stdout, _, success) = run_gqa(&config_path, &["export"]);
    assert!(success);

    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["version"], 1);
    assert!(value["docs"].as_array().unwrap().is_empty());
    assert!(value["chunks"].as_array().unwrap().is_empty());
}

#[test]
fn import_rejects_malformed_payload() {
    let (tmp, config_path) = setup_test_env();

    run_gqa(&config_path, &["init"]);

    let bad = tmp.path().join("bad.json");
    fs::write(&bad, r#"{"version": 1, "docs": []}"#).unwrap();

    let (_, stderr, success) = run_gqa(&config_path, &["import", bad.to_str().unwrap()]);
    assert!(!success, "import of malformed payload must fail");
    assert!(stderr.contains("invalid import file"), "stderr: {}", stderr);
}

#[test]
fn reindex_on_empty_corpus_succeeds() {
    let (_tmp, config_path) = setup_test_env();

    run_gqa(&config_path, &["init"]);
    let (stdout, _, success) = run_gqa(&config_path, &["reindex"]);
    assert!(success);
    assert!(stdout.contains("chunks re-embedded: 0"));
}

#[test]
fn export_import_roundtrip_via_files() {
    let (tmp, config_path) = setup_test_env();

    run_gqa(&config_path, &["init"]);

    // Seed through import (ingestion would need an embedding model).
    let seed = tmp.path().join("seed.json");
    fs::write(
        &seed,
        r#"{
            "version": 1,
            "exportedAt": "2025-06-01T00:00:00Z",
            "docs": [{"id": "d1", "name": "a.txt", "type": "text/plain", "size": 10, "addedAt": "2025-06-01T00:00:00Z"}],
            "chunks": [{"id": "d1|p1|c0", "docId": "d1", "docName": "a.txt", "page": 1, "text": "imported chunk text"}]
        }"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_gqa(&config_path, &["import", seed.to_str().unwrap()]);
    assert!(success, "import failed: {} {}", stdout, stderr);
    assert!(stdout.contains("documents: 1"));

    let out = tmp.path().join("roundtrip.json");
    let (_, _, success) = run_gqa(
        &config_path,
        &["export", "--output", out.to_str().unwrap()],
    );
    assert!(success);

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(value["docs"][0]["id"], "d1");
    assert_eq!(value["chunks"][0]["docId"], "d1");
    assert_eq!(value["chunks"][0]["text"], "imported chunk text");
}
