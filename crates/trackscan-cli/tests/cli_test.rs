use predicates::prelude::*;

use std::fs;
use std::io::{Cursor, Write};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const RULES: &str = r#"
rule onesignal : tracker
{
    strings:
        $code_signature = /com\.onesignal/
    condition:
        any of them
}
"#;

const FEED: &str = r#"{"trackers": {
    "1": {"name": "Adjust", "website": "https://www.adjust.com", "code_signature": "com.adjust.sdk", "network_signature": "app\\.adjust\\.com"},
    "2": {"name": "Nothing", "website": "", "code_signature": "", "network_signature": ""}
}}"#;

fn sample_apk(dir: &TempDir) -> std::path::PathBuf {
    let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
    w.start_file("classes.dex", SimpleFileOptions::default()).unwrap();
    let mut dex = b"dex\n035\0com.onesignal.OneSignal".to_vec();
    dex.extend_from_slice(&[0u8; 2048]);
    w.write_all(&dex).unwrap();
    let bytes = w.finish().unwrap().into_inner();
    let path = dir.path().join("app.apk");
    fs::write(&path, bytes).unwrap();
    path
}

/// Test that the binary runs and shows help
#[test]
fn test_help_command() {
    assert_cmd::cargo_bin_cmd!("trackscan")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("gen"));
}

#[test]
fn test_scan_nonexistent_file() {
    let dir = TempDir::new().unwrap();
    assert_cmd::cargo_bin_cmd!("trackscan")
        .current_dir(dir.path())
        .args(["scan", "/nonexistent/app.apk"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_scan_with_broken_rules_fails() {
    let dir = TempDir::new().unwrap();
    let apk = sample_apk(&dir);
    fs::write(dir.path().join("trackers.yara"), "rule broken {").unwrap();
    assert_cmd::cargo_bin_cmd!("trackscan")
        .current_dir(dir.path())
        .arg("scan")
        .arg(&apk)
        .assert()
        .failure()
        .stderr(predicate::str::contains("compile"));
}

#[test]
fn test_scan_prints_matches() {
    let dir = TempDir::new().unwrap();
    let apk = sample_apk(&dir);
    fs::write(dir.path().join("trackers.yara"), RULES).unwrap();
    assert_cmd::cargo_bin_cmd!("trackscan")
        .current_dir(dir.path())
        .env("NO_COLOR", "1")
        .arg("scan")
        .arg(&apk)
        .assert()
        .success()
        .stdout(predicate::str::contains("Matches in classes.dex:"))
        .stdout(predicate::str::contains("Rule: onesignal"));
}

#[test]
fn test_scan_json_export() {
    let dir = TempDir::new().unwrap();
    let apk = sample_apk(&dir);
    fs::write(dir.path().join("trackers.yara"), RULES).unwrap();
    assert_cmd::cargo_bin_cmd!("trackscan")
        .current_dir(dir.path())
        .arg("scan")
        .arg(&apk)
        .args(["--threads", "1", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Results saved to output.json"));

    let text = fs::read_to_string(dir.path().join("output.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "apk": {},
            "dex": {"classes.dex": {"onesignal": {"code_signature": ["com.onesignal"]}}},
            "elf": {}
        })
    );
}

#[test]
fn test_gen_refuses_existing_corpus() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("trackers.yara"), RULES).unwrap();
    fs::write(dir.path().join("feed.json"), FEED).unwrap();
    assert_cmd::cargo_bin_cmd!("trackscan")
        .current_dir(dir.path())
        .args(["gen", "--feed-file", "feed.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(fs::read_to_string(dir.path().join("trackers.yara")).unwrap(), RULES);
}

#[test]
fn test_gen_from_feed_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("feed.json"), FEED).unwrap();
    assert_cmd::cargo_bin_cmd!("trackscan")
        .current_dir(dir.path())
        .args(["gen", "--feed-file", "feed.json", "--rules", "out.yara"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 1 rules"));

    let corpus = fs::read_to_string(dir.path().join("out.yara")).unwrap();
    assert!(corpus.contains("rule adjust : tracker"));
    assert!(!corpus.contains("rule nothing"));
}

#[test]
fn test_gen_with_bad_feed_writes_nothing() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("feed.json"), "not json").unwrap();
    assert_cmd::cargo_bin_cmd!("trackscan")
        .current_dir(dir.path())
        .args(["gen", "--feed-file", "feed.json"])
        .assert()
        .failure();
    assert!(!dir.path().join("trackers.yara").exists());
}
