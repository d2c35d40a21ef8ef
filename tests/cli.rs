use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_libre-chat"))
}

/// Retrieval config with offline hash embeddings and a small corpus.
fn setup_test_env(with_documents: bool) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let documents = root.join("documents");
    fs::create_dir_all(&documents).unwrap();
    if with_documents {
        fs::write(
            documents.join("amsterdam.txt"),
            "Amsterdam is the capital of the Netherlands.",
        )
        .unwrap();
        fs::write(
            documents.join("alzheimer.md"),
            "# Treatments\n\nSeveral drugs are approved by the FDA to mitigate Alzheimer symptoms.",
        )
        .unwrap();
    }

    let config_content = format!(
        r#"[llm]
url = "http://127.0.0.1:1"

[vector]
vector_path = "{root}/vectorstore/db"
documents_path = "{root}/documents"
chunk_size = 200
chunk_overlap = 20

[embedding]
provider = "hash"
dims = 128

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display()
    );
    let config_path = root.join("chat.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run libre-chat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_build_creates_index() {
    let (tmp, config) = setup_test_env(true);
    let (stdout, stderr, ok) = run(&config, &["build"]);
    assert!(ok, "build failed: {}", stderr);
    assert!(stdout.contains("build vectorstore"));
    assert!(stdout.contains("files loaded: 2"));
    assert!(stdout.contains("state: Built"));
    assert!(stdout.trim_end().ends_with("ok"));
    assert!(tmp.path().join("vectorstore/db/index.json").exists());
    assert!(tmp.path().join("vectorstore/db/vectors.bin").exists());
}

#[test]
fn test_build_reuses_existing_index() {
    let (_tmp, config) = setup_test_env(true);
    let (_, _, ok) = run(&config, &["build"]);
    assert!(ok);

    let (stdout, _, ok) = run(&config, &["build"]);
    assert!(ok);
    assert!(stdout.contains("reused existing index"), "got: {}", stdout);

    let (stdout, _, ok) = run(&config, &["build", "--force"]);
    assert!(ok);
    assert!(stdout.contains("chunks embedded: 2"), "got: {}", stdout);
}

#[test]
fn test_force_build_replaces_corrupt_index() {
    let (tmp, config) = setup_test_env(true);
    let (_, _, ok) = run(&config, &["build"]);
    assert!(ok);
    fs::write(tmp.path().join("vectorstore/db/index.json"), "garbage").unwrap();

    let (_, stderr, ok) = run(&config, &["build"]);
    assert!(!ok);
    assert!(stderr.contains("index.json"), "got: {}", stderr);

    let (stdout, stderr, ok) = run(&config, &["build", "--force"]);
    assert!(ok, "forced build failed: {}", stderr);
    assert!(stdout.contains("chunks embedded: 2"), "got: {}", stdout);
    assert!(stdout.contains("state: Built"));

    let (stdout, _, ok) = run(&config, &["build"]);
    assert!(ok);
    assert!(stdout.contains("reused existing index"));
}

#[test]
fn test_build_empty_corpus() {
    let (tmp, config) = setup_test_env(false);
    let (stdout, stderr, ok) = run(&config, &["build"]);
    assert!(ok, "build failed: {}", stderr);
    assert!(stdout.contains("chunks embedded: 0"));
    assert!(stdout.contains("state: Absent"));
    assert!(!tmp.path().join("vectorstore/db").exists());
}

#[test]
fn test_query_without_index_prints_notice() {
    let (_tmp, config) = setup_test_env(false);
    let (stdout, stderr, ok) = run(&config, &["query", "What is the capital of the Netherlands?"]);
    assert!(ok, "query failed: {}", stderr);
    assert!(stdout.contains("has not been built"), "got: {}", stdout);
}

#[test]
fn test_query_stream_without_index_prints_notice() {
    let (_tmp, config) = setup_test_env(false);
    let (stdout, _, ok) = run(&config, &["query", "--stream", "Anything?"]);
    assert!(ok);
    assert!(stdout.contains("has not been built"));
}

#[test]
fn test_query_empty_prompt() {
    let (_tmp, config) = setup_test_env(false);
    let (_, stderr, ok) = run(&config, &["query", ""]);
    assert!(!ok);
    assert!(stderr.contains("Provide a prompt"), "got: {}", stderr);
}

#[test]
fn test_query_unreachable_model_fails() {
    let (_tmp, config) = setup_test_env(true);
    let (_, _, ok) = run(&config, &["build"]);
    assert!(ok);
    let (_, stderr, ok) = run(&config, &["query", "What is the capital of the Netherlands?"]);
    assert!(!ok);
    assert!(stderr.contains("127.0.0.1:1"), "got: {}", stderr);
}

#[test]
fn test_build_in_conversational_mode_errors() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("chat.toml");
    fs::write(&config, "[embedding]\nprovider = \"hash\"\n").unwrap();
    let (_, stderr, ok) = run(&config, &["build"]);
    assert!(!ok);
    assert!(stderr.contains("vector_path"), "got: {}", stderr);
}

#[test]
fn test_invalid_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("chat.toml");
    fs::write(&config, "[vector]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap();
    let (_, stderr, ok) = run(&config, &["download"]);
    assert!(!ok);
    assert!(stderr.contains("chunk_overlap"), "got: {}", stderr);
}

#[test]
fn test_download_with_nothing_configured() {
    let (_tmp, config) = setup_test_env(false);
    let (stdout, stderr, ok) = run(&config, &["download"]);
    assert!(ok, "download failed: {}", stderr);
    assert!(stdout.contains("downloaded: 0"));
    assert!(stdout.contains("failed: 0"));
}
