//! End-to-end tests for the `reelstats` binary.
//!
//! Each test runs the binary as a subprocess against its own temp data dir.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

const CAPTURE: &str = r#"{"kind":"post","identityKeyGuess":"h:alice","postId":"p1","snapshot":{"t":1700000000,"views":10,"likes":2}}
{"kind":"post","identityKeyGuess":"h:alice","postId":"p1","snapshot":{"t":1700000600,"views":25,"likes":3}}
{"kind":"profile","identityKeyGuess":"h:alice","handle":"alice","id":"5","followers":300,"t":1700000000}

{"kind":"post","identityKeyGuess":"c:bob","postId":"p2","snapshot":{"t":1700000000,"remix_count":1}}
not json at all
{"kind":"post","identityKeyGuess":"__top_today__","postId":"p3","snapshot":{"t":1700000000,"views":1}}
"#;

/// Build a Command targeting the reelstats binary with `dir` as data dir.
fn rs_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("reelstats"));
    cmd.arg("--data-dir").arg(dir);
    cmd.env("REELSTATS_LOG", "error");
    cmd.env_remove("REELSTATS_FORMAT");
    cmd
}

fn write_capture(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("capture.jsonl");
    fs::write(&path, body).expect("write capture");
    path
}

/// Run with `--json` and parse stdout.
fn json_of(dir: &Path, args: &[&str]) -> Value {
    let output = rs_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("command should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON on stdout")
}

fn ingest(data: &TempDir, work: &TempDir, body: &str) -> Value {
    let capture = write_capture(work.path(), body);
    let capture = capture.to_str().expect("utf-8 path");
    json_of(data.path(), &["ingest", capture, "--no-comb"])
}

// ---------------------------------------------------------------------------
// Ingest and read
// ---------------------------------------------------------------------------

#[test]
fn ingest_reports_line_outcomes() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    let summary = ingest(&data, &work, CAPTURE);

    assert_eq!(summary["lines"], 6);
    assert_eq!(summary["recorded"], 4);
    assert_eq!(summary["malformed"], 1);
    assert_eq!(summary["rejected"], 1);
    assert_eq!(summary["saved"], 2);
    assert!(summary.get("comb").is_none());
    assert!(data.path().join("reelstats.db").exists());
}

#[test]
fn users_lists_saved_buckets() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    ingest(&data, &work, CAPTURE);

    let users = json_of(data.path(), &["users"]);
    let users = users.as_array().expect("array");
    assert_eq!(users.len(), 2);
    let alice = users
        .iter()
        .find(|u| u["key"] == "h:alice")
        .expect("alice listed");
    assert_eq!(alice["handle"], "alice");
    assert_eq!(alice["postCount"], 1);
}

#[test]
fn show_reads_hot_then_full_history() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    ingest(&data, &work, CAPTURE);

    let hot = json_of(data.path(), &["show", "h:alice"]);
    assert_eq!(hot["key"], "h:alice");
    assert_eq!(hot["followers"], 300);
    assert_eq!(hot["posts"][0]["snapshots"], 1);
    assert_eq!(hot["posts"][0]["latest"]["views"], 25);
    assert!(hot.get("history").is_none());

    let full = json_of(data.path(), &["show", "h:alice", "--full"]);
    assert_eq!(full["posts"][0]["snapshots"], 2);
    let history = &full["history"]["posts"]["p1"]["snapshots"];
    assert_eq!(history[0]["t"], 1_700_000_000_000_i64);
    assert_eq!(history[1]["likes"], 3);
}

#[test]
fn show_unknown_key_fails_with_code() {
    let data = TempDir::new().expect("data dir");
    rs_cmd(data.path())
        .args(["show", "h:nobody", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error_code\": \"E2003\""));
}

#[test]
fn invalid_key_is_a_usage_error() {
    let data = TempDir::new().expect("data dir");
    rs_cmd(data.path())
        .args(["show", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid identity key"));
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

#[test]
fn comb_runs_once_per_interval() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    ingest(&data, &work, CAPTURE);

    let first = json_of(data.path(), &["comb"]);
    assert_eq!(first["status"], "ran");
    // 1700000600 is ten minutes after its predecessor and long past the
    // recent window, so it is thinned away.
    assert_eq!(first["removed"], 1);

    let second = json_of(data.path(), &["comb"]);
    assert_eq!(second["status"], "not_due");
    assert!(second["next_at"].is_i64());

    let forced = json_of(data.path(), &["comb", "--force"]);
    assert_eq!(forced["status"], "ran");
    assert_eq!(forced["removed"], 0);
}

#[test]
fn reconcile_moves_foreign_post_to_owner() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    let body = r#"{"kind":"profile","identityKeyGuess":"h:alice","handle":"alice","id":"1","followers":5}
{"kind":"post","identityKeyGuess":"h:alice","postId":"stray","ownerHints":{"id":"2","handle":"bob"},"snapshot":{"t":1700000000,"views":7}}
"#;
    ingest(&data, &work, body);

    let report = json_of(data.path(), &["reconcile", "h:alice"]);
    assert_eq!(report["moved"], 1);
    assert_eq!(report["removed"], 0);

    let bob = json_of(data.path(), &["show", "id:2", "--full"]);
    assert_eq!(bob["posts"][0]["post_id"], "stray");
}

#[test]
fn purge_requires_confirmation() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    ingest(&data, &work, CAPTURE);

    rs_cmd(data.path())
        .args(["purge", "c:bob"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("without --yes"));

    let purged = json_of(data.path(), &["purge", "c:bob", "--yes"]);
    assert_eq!(purged["posts_removed"], 1);

    let users = json_of(data.path(), &["users"]);
    assert_eq!(users.as_array().map(Vec::len), Some(1));
}

// ---------------------------------------------------------------------------
// Portability
// ---------------------------------------------------------------------------

#[test]
fn export_then_import_into_fresh_store() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    ingest(&data, &work, CAPTURE);

    let bundle_path = work.path().join("bundle.json");
    let bundle_arg = bundle_path.to_str().expect("utf-8 path");
    let exported = json_of(data.path(), &["export", bundle_arg]);
    assert_eq!(exported["users"], 2);
    assert_eq!(exported["snapshots"], 3);

    let fresh = TempDir::new().expect("fresh dir");
    let report = json_of(fresh.path(), &["import", bundle_arg]);
    assert_eq!(report["users"], 2);
    assert_eq!(report["posts"], 2);

    let full = json_of(fresh.path(), &["show", "h:alice", "--full"]);
    assert_eq!(full["posts"][0]["snapshots"], 2);
}

#[test]
fn import_rejects_garbage() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    let path = work.path().join("bad.json");
    fs::write(&path, "[1, 2, 3]").expect("write");

    rs_cmd(data.path())
        .args(["import", path.to_str().expect("utf-8 path"), "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E3001"));
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

#[test]
fn refresh_check_skips_until_marker_moves() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    ingest(&data, &work, CAPTURE);

    let first = json_of(data.path(), &["refresh-check"]);
    assert_eq!(first["action"], "refresh");
    assert_eq!(first["reason"], "changed_or_unknown");

    let second = json_of(data.path(), &["refresh-check"]);
    assert_eq!(second["action"], "skip");
    assert_eq!(second["skip_streak"], 1);

    ingest(
        &data,
        &work,
        r#"{"kind":"post","identityKeyGuess":"h:alice","postId":"p9","snapshot":{"t":1700001000,"views":1}}"#,
    );
    let third = json_of(data.path(), &["refresh-check"]);
    assert_eq!(third["action"], "refresh");
    assert!(data.path().join("refresh-state.json").exists());
}

#[test]
fn pretty_output_when_forced() {
    let data = TempDir::new().expect("data dir");
    let work = TempDir::new().expect("work dir");
    ingest(&data, &work, CAPTURE);

    rs_cmd(data.path())
        .args(["--format", "pretty", "users"])
        .assert()
        .success()
        .stdout(predicate::str::contains("KEY").and(predicate::str::contains("h:alice")));
}
