use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sdx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sdx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let notes_dir = root.join("notes");
    fs::create_dir_all(notes_dir.join("work/project-alpha")).unwrap();
    fs::write(notes_dir.join("work/project-alpha/receipt.jpg"), b"\xff\xd8fake-jpeg").unwrap();
    fs::write(notes_dir.join("work/project-alpha/contract.pdf"), b"%PDF-fake").unwrap();
    fs::write(notes_dir.join("work/project-alpha/notes.txt"), b"not a scan").unwrap();

    let config_content = format!(
        r#"[watch]
root = "{root}/notes"

[state]
path = "{root}/data/processed_files.json"

[ocr]
endpoint = "https://ocr.example.com"

[embedding]
endpoint = "https://aoai.example.com"

[index]
endpoint = "https://search.example.com"
"#,
        root = root.display()
    );

    let config_path = root.join("sdx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sdx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sdx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("SCANDEX_OCR_KEY", "test-ocr-key")
        .env("SCANDEX_EMBEDDING_KEY", "test-embedding-key")
        .env("SCANDEX_SEARCH_KEY", "test-search-key")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sdx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_missing_config_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_sdx(&tmp.path().join("nope.toml"), &["state", "count"]);
    assert!(!success);
    assert!(stderr.contains("config"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_exits_nonzero() {
    let (tmp, config_path) = setup_test_env();
    let bad = fs::read_to_string(&config_path)
        .unwrap()
        .replace("root =", "polling_interval_secs = 5\nroot =");
    let bad_path = tmp.path().join("bad.toml");
    fs::write(&bad_path, bad).unwrap();

    let (_, _, success) = run_sdx(&bad_path, &["state", "count"]);
    assert!(!success);
}

#[test]
fn test_state_count_starts_at_zero() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_sdx(&config_path, &["state", "count"]);
    assert!(success, "state count failed: {}", stderr);
    assert_eq!(stdout.trim(), "0");
}

#[test]
fn test_state_clear_on_empty_ledger() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_sdx(&config_path, &["state", "clear"]);
    assert!(success);
    assert!(stdout.contains("cleared 0 entries"));
}

#[test]
fn test_state_remove_absent_path_is_ok() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_sdx(&config_path, &["state", "remove", "/never/seen.jpg"]);
    assert!(success);
    assert!(stdout.contains("removed"));
}

#[test]
fn test_health_reports_every_component() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_sdx(&config_path, &["health"]);
    assert!(success);
    for component in ["watcher", "ledger", "ocr", "embedding", "index"] {
        assert!(stdout.contains(component), "missing {} in: {}", component, stdout);
    }
    // Keys come from the environment, so every service row is healthy.
    assert!(!stdout.contains("false"), "unexpected unhealthy row: {}", stdout);
}

#[test]
fn test_scan_dry_run_lists_backlog() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_sdx(&config_path, &["scan", "--dry-run"]);
    assert!(success, "dry-run failed: {}", stderr);
    assert!(stdout.contains("unprocessed files: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("receipt.jpg"));
    assert!(stdout.contains("contract.pdf"));
    assert!(!stdout.contains("notes.txt"));
}

#[test]
fn test_scan_dry_run_respects_ledger() {
    let (tmp, config_path) = setup_test_env();

    // Seed a ledger that already contains one of the files.
    let seen = tmp.path().join("notes/work/project-alpha/receipt.jpg");
    let ledger = serde_json::json!({
        "processed_files": [seen.to_string_lossy()],
        "last_updated": "2026-01-01T00:00:00Z",
        "total_files": 1,
    });
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(
        tmp.path().join("data/processed_files.json"),
        serde_json::to_string_pretty(&ledger).unwrap(),
    )
    .unwrap();

    let (stdout, _, success) = run_sdx(&config_path, &["scan", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("unprocessed files: 1"), "stdout: {}", stdout);
    assert!(!stdout.contains("receipt.jpg"));
}

#[test]
fn test_state_list_reflects_seeded_ledger() {
    let (tmp, config_path) = setup_test_env();

    let ledger = serde_json::json!({
        "processed_files": ["/notes/a.jpg", "/notes/b.jpg"],
        "last_updated": "2026-01-01T00:00:00Z",
        "total_files": 2,
    });
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(
        tmp.path().join("data/processed_files.json"),
        serde_json::to_string_pretty(&ledger).unwrap(),
    )
    .unwrap();

    let (stdout, _, success) = run_sdx(&config_path, &["state", "list"]);
    assert!(success);
    assert!(stdout.contains("/notes/a.jpg"));
    assert!(stdout.contains("/notes/b.jpg"));

    let (stdout, _, success) = run_sdx(&config_path, &["state", "count"]);
    assert!(success);
    assert_eq!(stdout.trim(), "2");
}

#[test]
fn test_state_remove_then_count() {
    let (tmp, config_path) = setup_test_env();

    let ledger = serde_json::json!({
        "processed_files": ["/notes/a.jpg", "/notes/b.jpg"],
        "last_updated": "2026-01-01T00:00:00Z",
        "total_files": 2,
    });
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(
        tmp.path().join("data/processed_files.json"),
        serde_json::to_string_pretty(&ledger).unwrap(),
    )
    .unwrap();

    let (_, _, success) = run_sdx(&config_path, &["state", "remove", "/notes/a.jpg"]);
    assert!(success);

    let (stdout, _, success) = run_sdx(&config_path, &["state", "count"]);
    assert!(success);
    assert_eq!(stdout.trim(), "1");
}

#[test]
fn test_corrupted_ledger_degrades_to_empty() {
    let (tmp, config_path) = setup_test_env();
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(tmp.path().join("data/processed_files.json"), "{ corrupted").unwrap();

    let (stdout, _, success) = run_sdx(&config_path, &["state", "count"]);
    assert!(success, "corrupted ledger must not crash");
    assert_eq!(stdout.trim(), "0");
}
