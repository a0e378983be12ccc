//! Integration tests for the migraph binary
//!
//! These are smoke tests that verify:
//! - CLI parsing and global flags work
//! - Commands run end to end against a temporary directory and database
//! - Output format is correct (human/json)
//! - Errors map to the documented exit codes
//!
//! Graph, merge and reconcile semantics are covered by the unit tests and
//! by workflow_test.rs.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Test context for integration tests
///
/// Provides a script directory, a database path and the migraph binary.
struct TestContext {
    migraph_bin: PathBuf,
    dir: PathBuf,
    db_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        Self {
            migraph_bin: PathBuf::from(env!("CARGO_BIN_EXE_migraph")),
            dir: temp_dir.path().join("migrations"),
            db_path: temp_dir.path().join("target.db"),
            _temp_dir: temp_dir,
        }
    }

    /// Context with an initialized, empty script directory
    fn initialized() -> Self {
        let ctx = Self::new();
        let out = ctx.run(&["init"]);
        assert!(out.success(), "init failed: {}", out.stderr);
        ctx
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.migraph_bin);
        cmd.args(args)
            .arg("--dir")
            .arg(&self.dir)
            .arg("--db")
            .arg(&self.db_path)
            .env_remove("MIGRAPH_REPO")
            .env("RUST_LOG", "warn");
        cmd
    }

    /// Run migraph with the given arguments
    fn run(&self, args: &[&str]) -> TestOutput {
        let output = self.command(args).output().expect("Failed to run migraph");
        TestOutput::from(output)
    }

    /// Run migraph feeding `input` on stdin
    fn run_with_input(&self, args: &[&str], input: &str) -> TestOutput {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to spawn migraph");
        child
            .stdin
            .take()
            .unwrap()
            .write_all(input.as_bytes())
            .unwrap();
        let output = child.wait_with_output().unwrap();
        TestOutput::from(output)
    }

    /// Drop a descriptor straight into versions/
    fn write_descriptor(&self, file: &str, body: &str) {
        fs::write(self.dir.join("versions").join(file), body).unwrap();
    }

    /// a (main) <- b (main), a <- c (feature)
    fn write_fork(&self) {
        self.write_descriptor(
            "a.json",
            r#"{"id": "a", "branch": "main", "sequence": 1, "upgrade": ["CREATE TABLE users (id INTEGER PRIMARY KEY)"]}"#,
        );
        self.write_descriptor(
            "b.json",
            r#"{"id": "b", "parents": "a", "branch": "main", "sequence": 2, "upgrade": ["ALTER TABLE users ADD COLUMN name TEXT"]}"#,
        );
        self.write_descriptor(
            "c.json",
            r#"{"id": "c", "parents": "a", "branch": "feature", "sequence": 3, "upgrade": ["CREATE TABLE posts (id INTEGER PRIMARY KEY)"]}"#,
        );
    }
}

/// Output from running a migraph command
struct TestOutput {
    stdout: String,
    stderr: String,
    status: std::process::ExitStatus,
}

impl From<std::process::Output> for TestOutput {
    fn from(output: std::process::Output) -> Self {
        TestOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

impl TestOutput {
    /// Returns true if the command succeeded
    fn success(&self) -> bool {
        self.status.success()
    }

    fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Returns true if stdout contains the given substring
    fn stdout_contains(&self, s: &str) -> bool {
        self.stdout.contains(s)
    }

    /// Returns true if stderr contains the given substring
    fn stderr_contains(&self, s: &str) -> bool {
        self.stderr.contains(s)
    }
}

// ============================================================================
// Integration tests for each command
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let ctx = TestContext::new();
    let out = ctx.run(&["--help"]);
    assert!(out.success());
    for command in ["init", "heads", "merge", "migrate", "compare-history", "log"] {
        assert!(out.stdout_contains(command), "missing {} in help", command);
    }
}

#[test]
fn test_init_creates_directory() {
    let ctx = TestContext::new();
    let out = ctx.run(&["init"]);
    assert!(out.success(), "stderr: {}", out.stderr);
    assert!(ctx.dir.join("versions").is_dir());
    assert!(ctx.dir.join("README").is_file());

    // Second init refuses to touch the directory
    let again = ctx.run(&["init"]);
    assert_eq!(again.code(), Some(2));
    assert!(again.stderr_contains("already exists"));
}

#[test]
fn test_init_unknown_template() {
    let ctx = TestContext::new();
    let out = ctx.run(&["init", "--template", "nope"]);
    assert_eq!(out.code(), Some(2));
    assert!(!ctx.dir.exists());
}

#[test]
fn test_init_list_templates() {
    let ctx = TestContext::new();
    let out = ctx.run(&["init", "--list"]);
    assert!(out.success());
    assert!(out.stdout_contains("git-generic"));
    assert!(out.stdout_contains("empty"));
}

#[test]
fn test_heads_without_directory() {
    let ctx = TestContext::new();
    let out = ctx.run(&["heads"]);
    assert_eq!(out.code(), Some(4));
    assert!(out.stderr_contains("migration directory not found"));
}

#[test]
fn test_heads_json_error_format() {
    let ctx = TestContext::new();
    let out = ctx.run(&["heads", "--output", "json"]);
    assert_eq!(out.code(), Some(4));
    let json: serde_json::Value = serde_json::from_str(out.stdout.trim()).unwrap();
    assert_eq!(json["error"], "DirectoryMissing");
    assert_eq!(json["code"], "E001");
}

#[test]
fn test_create_chain_and_list() {
    let ctx = TestContext::initialized();
    assert!(ctx.run(&["create", "create users", "--branch", "main"]).success());
    assert!(ctx.run(&["create", "add email", "--branch", "main"]).success());

    let out = ctx.run(&["heads", "--output", "json"]);
    assert!(out.success());
    let json: serde_json::Value = serde_json::from_str(out.stdout.trim()).unwrap();
    assert_eq!(json["tool"], "migraph");
    let heads = json["data"].as_array().unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0]["message"], "add email");
    assert_eq!(heads[0]["branch"], "main");

    let history = ctx.run(&["history", "--oldest-first"]);
    assert!(history.success());
    let first = history.stdout.find("create users").unwrap();
    let second = history.stdout.find("add email").unwrap();
    assert!(first < second);
}

#[test]
fn test_create_refuses_with_two_heads() {
    let ctx = TestContext::initialized();
    ctx.write_fork();

    let out = ctx.run(&["create", "next", "--branch", "main", "--no-merge"]);
    assert_eq!(out.code(), Some(5));
    assert!(out.stderr_contains("2 heads"));
}

#[test]
fn test_merge_lists_candidates_as_json() {
    let ctx = TestContext::initialized();
    ctx.write_fork();

    let out = ctx.run(&["merge", "--output", "json"]);
    assert!(out.success(), "stderr: {}", out.stderr);
    let json: serde_json::Value = serde_json::from_str(out.stdout.trim()).unwrap();
    let candidates = json["data"].as_array().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["first_branch"], "main");
    assert_eq!(candidates[0]["second_branch"], "feature");
}

#[test]
fn test_merge_with_choice() {
    let ctx = TestContext::initialized();
    ctx.write_fork();

    let out = ctx.run(&["merge", "--choice", "1", "--output", "json"]);
    assert!(out.success(), "stderr: {}", out.stderr);
    let json: serde_json::Value = serde_json::from_str(out.stdout.trim()).unwrap();
    let merged = &json["data"]["merged"];
    assert_eq!(merged["parents"], serde_json::json!(["c", "b"]));
    assert_eq!(merged["branch"], "merge_main_into_feature");

    let heads = ctx.run(&["heads", "--output", "json"]);
    let json: serde_json::Value = serde_json::from_str(heads.stdout.trim()).unwrap();
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

#[test]
fn test_merge_choice_out_of_range() {
    let ctx = TestContext::initialized();
    ctx.write_fork();

    let out = ctx.run(&["merge", "--choice", "4"]);
    assert_eq!(out.code(), Some(2));
    assert!(out.stderr_contains("between 1 and 1"));
}

#[test]
fn test_merge_prompt_reads_stdin() {
    let ctx = TestContext::initialized();
    ctx.write_fork();

    let out = ctx.run_with_input(&["merge"], "x\n1\n");
    assert!(out.success(), "stderr: {}", out.stderr);
    assert!(out.stdout_contains("1) main -> feature"));
    assert!(out.stdout_contains("must be an integer"));
    assert!(out.stdout_contains("mergepoint"));
}

#[test]
fn test_merge_with_single_head() {
    let ctx = TestContext::initialized();
    assert!(ctx.run(&["create", "only", "--branch", "main"]).success());

    let out = ctx.run(&["merge", "--choice", "1"]);
    assert!(out.success());
    assert!(out.stdout_contains("Nothing to merge"));
}

#[test]
fn test_migrate_and_compare_history() {
    let ctx = TestContext::initialized();
    ctx.write_fork();

    let refused = ctx.run(&["migrate", "--no-merge"]);
    assert_eq!(refused.code(), Some(5));

    assert!(ctx.run(&["merge", "--choice", "1"]).success());

    let pending = ctx.run(&["pending", "--output", "json"]);
    let json: serde_json::Value = serde_json::from_str(pending.stdout.trim()).unwrap();
    assert_eq!(json["data"].as_array().unwrap().len(), 4);

    let out = ctx.run(&["migrate", "--output", "json"]);
    assert!(out.success(), "stderr: {}", out.stderr);
    let json: serde_json::Value = serde_json::from_str(out.stdout.trim()).unwrap();
    assert_eq!(json["data"]["applied"].as_array().unwrap().len(), 4);
    assert_eq!(json["data"]["logged"], 3);

    let compare = ctx.run(&["compare-history", "--output", "json"]);
    assert!(compare.success(), "stderr: {}", compare.stderr);
    let json: serde_json::Value = serde_json::from_str(compare.stdout.trim()).unwrap();
    assert_eq!(json["data"]["matched"].as_array().unwrap().len(), 3);
    assert_eq!(json["data"]["pending"], 0);

    let log = ctx.run(&["log", "--limit", "1"]);
    assert!(log.success());
    assert!(log.stdout_contains("c,b ->"));

    let again = ctx.run(&["migrate"]);
    assert!(again.success());
    assert!(again.stdout_contains("up to date"));
}

#[test]
fn test_downgrade_then_migrate_again() {
    let ctx = TestContext::initialized();
    ctx.write_fork();
    assert!(ctx.run(&["merge", "--choice", "1"]).success());
    assert!(ctx.run(&["migrate"]).success());

    let unknown = ctx.run(&["downgrade", "nope"]);
    assert_eq!(unknown.code(), Some(6));

    let out = ctx.run(&["downgrade", "a", "--output", "json"]);
    assert!(out.success(), "stderr: {}", out.stderr);
    let json: serde_json::Value = serde_json::from_str(out.stdout.trim()).unwrap();
    let reverted: Vec<&str> = json["data"]["reverted"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(reverted.len(), 3);
    assert_eq!(&reverted[1..], &["c", "b"]);
    assert_eq!(json["data"]["unlogged"], 3);

    let current = ctx.run(&["current"]);
    assert_eq!(current.stdout.trim(), "a");

    let pending = ctx.run(&["pending", "--output", "json"]);
    let json: serde_json::Value = serde_json::from_str(pending.stdout.trim()).unwrap();
    assert_eq!(json["data"].as_array().unwrap().len(), 3);

    let again = ctx.run(&["migrate", "--output", "json"]);
    assert!(again.success(), "stderr: {}", again.stderr);
    let json: serde_json::Value = serde_json::from_str(again.stdout.trim()).unwrap();
    assert_eq!(json["data"]["applied"].as_array().unwrap().len(), 3);
    assert!(ctx.run(&["compare-history"]).success());
}

#[test]
fn test_compare_history_reports_divergence() {
    let ctx = TestContext::initialized();
    ctx.write_fork();
    assert!(ctx.run(&["merge", "--choice", "1"]).success());

    // Record c before b, against the linearization
    let conn = rusqlite::Connection::open(&ctx.db_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE migraph_version_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            previous_revision TEXT NOT NULL,
            forward_revision TEXT NOT NULL,
            UNIQUE (previous_revision, forward_revision)
        );
        INSERT INTO migraph_version_history (previous_revision, forward_revision)
        VALUES ('a', 'c');",
    )
    .unwrap();
    drop(conn);

    let out = ctx.run(&["compare-history"]);
    assert_eq!(out.code(), Some(5));
    assert!(out.stderr_contains("diverges at index 0"));
}

#[test]
fn test_current_on_fresh_database() {
    let ctx = TestContext::initialized();
    let out = ctx.run(&["current"]);
    assert!(out.success());
    assert_eq!(out.stdout.trim(), "none");
}

#[test]
fn test_last_revision() {
    let ctx = TestContext::initialized();
    ctx.write_fork();
    let out = ctx.run(&["last-revision"]);
    assert!(out.success());
    assert!(out.stdout_contains("a -> c"));
}
