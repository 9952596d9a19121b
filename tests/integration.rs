use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rvault_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rvault"))
}

fn setup_test_env(max_documents: usize) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("tides.md"),
        "Tides are caused by the gravitational pull of the moon and the sun. \
         Spring tides happen when the sun and moon align.",
    )
    .unwrap();
    fs::write(
        files_dir.join("sourdough.txt"),
        "A sourdough starter needs flour and water fed daily. \
         Bulk fermentation takes four to six hours at room temperature.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/rvault.sqlite"

[chunking]
max_chars = 120
overlap_chars = 20

[catalog]
max_documents = {}

[embedding]
provider = "hashing"
dims = 128

[logging]
default = "warn"
"#,
        root.display(),
        max_documents
    );

    let config_path = config_dir.join("rvault.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rvault(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rvault_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rvault binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn files(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env(10);

    let (stdout, stderr, success) = run_rvault(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_rvault(&config_path, &["init"]);
    assert!(success, "second init failed");
}

#[test]
fn test_ingest_then_query() {
    let (_tmp, config_path) = setup_test_env(10);
    let tides = files(&config_path, "tides.md");
    let bread = files(&config_path, "sourdough.txt");

    let (stdout, stderr, success) = run_rvault(
        &config_path,
        &["ingest", "--user", "alice", "--item", "tides", "--file", &tides],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Ingested"));

    run_rvault(
        &config_path,
        &["ingest", "--user", "alice", "--item", "bread", "--file", &bread],
    );

    let (stdout, stderr, success) = run_rvault(
        &config_path,
        &["query", "--user", "alice", "--top-k", "1", "spring tides moon align"],
    );
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("tides_"), "unexpected top result: {}", stdout);
}

#[test]
fn test_users_are_isolated() {
    let (_tmp, config_path) = setup_test_env(10);
    let tides = files(&config_path, "tides.md");

    run_rvault(
        &config_path,
        &["ingest", "--user", "alice", "--item", "tides", "--file", &tides],
    );

    let (stdout, _, success) = run_rvault(&config_path, &["query", "--user", "bob", "tides"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_quota_evicts_oldest() {
    let (_tmp, config_path) = setup_test_env(2);

    for item in ["first", "second", "third"] {
        let text = format!("{} document body", item);
        let (stdout, stderr, success) = run_rvault(
            &config_path,
            &["ingest", "--user", "alice", "--item", item, "--text", &text],
        );
        assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
        if item == "third" {
            assert!(stdout.contains("Evicted oldest document: first"), "{}", stdout);
        }
    }

    let (stdout, _, success) = run_rvault(&config_path, &["documents", "--user", "alice"]);
    assert!(success);
    assert!(stdout.contains("2 of 2 document(s)"));
    assert!(stdout.contains("third"));
    assert!(stdout.contains("second"));
    assert!(!stdout.contains("first"));
}

#[test]
fn test_delete_is_idempotent() {
    let (_tmp, config_path) = setup_test_env(10);

    run_rvault(
        &config_path,
        &["ingest", "--user", "alice", "--item", "note", "--text", "short note"],
    );

    let (stdout, _, success) =
        run_rvault(&config_path, &["delete", "--user", "alice", "--item", "note"]);
    assert!(success);
    assert!(stdout.contains("Deleted alice/note"));

    let (_, stderr, success) =
        run_rvault(&config_path, &["delete", "--user", "alice", "--item", "note"]);
    assert!(!success);
    assert!(stderr.contains("document note not found"), "{}", stderr);
}

#[test]
fn test_listing_commands_reject_invalid_user_ids() {
    let (_tmp, config_path) = setup_test_env(10);

    for args in [
        vec!["documents", "--user", "bad id"],
        vec!["delete", "--user", "bad/user", "--item", "note"],
        vec!["reconcile", "--user", "bad id"],
    ] {
        let (_, stderr, success) = run_rvault(&config_path, &args);
        assert!(!success, "{:?} should fail", args);
        assert!(stderr.contains("invalid character"), "{}", stderr);
    }
}

#[test]
fn test_invalid_ids_are_rejected() {
    let (_tmp, config_path) = setup_test_env(10);

    let (_, stderr, success) = run_rvault(
        &config_path,
        &["ingest", "--user", "alice", "--item", "bad id", "--text", "x"],
    );
    assert!(!success);
    assert!(stderr.contains("invalid character"), "{}", stderr);
}

#[test]
fn test_reconcile_rebuilds_listing() {
    let (_tmp, config_path) = setup_test_env(10);
    let tides = files(&config_path, "tides.md");

    run_rvault(
        &config_path,
        &["ingest", "--user", "alice", "--item", "tides", "--file", &tides],
    );

    let (stdout, stderr, success) = run_rvault(&config_path, &["reconcile", "--user", "alice"]);
    assert!(success, "reconcile failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1 document(s)"));
    assert!(stdout.contains("tides"));
}

#[test]
fn test_ask_without_generator_reports_configuration_error() {
    let (_tmp, config_path) = setup_test_env(10);

    run_rvault(
        &config_path,
        &["ingest", "--user", "alice", "--item", "note", "--text", "the boat is blue"],
    );

    let (_, stderr, success) =
        run_rvault(&config_path, &["ask", "--user", "alice", "what color is the boat?"]);
    assert!(!success);
    assert!(stderr.contains("generation provider is disabled"), "{}", stderr);
}
