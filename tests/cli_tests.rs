//! End-to-end tests for the `mailquery` binary.

use std::path::Path;
use std::process::{Command, Output};

use assert_fs::prelude::*;
use predicates::prelude::*;

fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
        .display()
        .to_string()
}

/// Run the binary with a throwaway config that keeps logs in `dir`.
fn run(dir: &assert_fs::TempDir, args: &[&str]) -> Output {
    let config = dir.child("config.toml");
    config
        .write_str(&format!(
            "[general]\ncache_dir = {:?}\n",
            dir.path().join("cache").display().to_string()
        ))
        .unwrap();
    Command::new(env!("CARGO_BIN_EXE_mailquery"))
        .arg("--config")
        .arg(config.path())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_explain_prints_plan() {
    let dir = assert_fs::TempDir::new().unwrap();
    let output = run(&dir, &["explain", r#"{"tag": "work"}"#]);
    assert!(output.status.success());
    assert!(predicate::str::contains("DB[(-IN:3,4 TAG:work)]").eval(&stdout(&output)));
}

#[test]
fn test_search_json_output() {
    let dir = assert_fs::TempDir::new().unwrap();
    let query = r#"{"text": {"term": {"field": "content", "text": "budget"}}}"#;
    let output = run(
        &dir,
        &["search", &fixture("mailbox.json"), query, "--limit", "3", "--json"],
    );
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["result_count"], 3);
    assert_eq!(json["more"], true);
    assert_eq!(json["sort"], "date-desc");
    let ids: Vec<i64> = json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![10, 8, 7]);
}

#[test]
fn test_search_reads_query_file_and_pages() {
    let dir = assert_fs::TempDir::new().unwrap();
    let query = dir.child("query.json");
    query.write_str(r#"{"and": []}"#).unwrap();
    let output = run(
        &dir,
        &[
            "search",
            &fixture("mailbox.json"),
            &query.path().display().to_string(),
            "--sort",
            "id-asc",
            "--cursor-id",
            "4",
            "--cursor-value",
            "4",
            "--offset",
        ],
    );
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(predicate::str::contains("4 result(s)").eval(&out));
    assert!(predicate::str::contains("3 result(s) before the cursor").eval(&out));
    assert!(predicate::str::contains("Budget final").eval(&out));
}

#[test]
fn test_bad_query_fails() {
    let dir = assert_fs::TempDir::new().unwrap();
    let output = run(&dir, &["explain", "{not json"]);
    assert!(!output.status.success());
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(predicate::str::contains("invalid query clause").eval(&err));
}

#[test]
fn test_completions() {
    let dir = assert_fs::TempDir::new().unwrap();
    let output = run(&dir, &["completions", "bash"]);
    assert!(output.status.success());
    assert!(predicate::str::contains("mailquery").eval(&stdout(&output)));
}
