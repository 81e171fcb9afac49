use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;

use plist::{Dictionary, Value};

const TEST_FILE_ID: &str = "5727bd1c5fa1055e15d8b4a75a74793c84b5ffdc";

fn get_unback_cmd() -> Command {
    Command::cargo_bin("unback").unwrap()
}

fn put_string(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(v) => {
            out.extend_from_slice(&(v.len() as u16).to_be_bytes());
            out.extend_from_slice(v.as_bytes());
        }
        None => out.extend_from_slice(&[0xFF, 0xFF]),
    }
}

fn mbdb_record(out: &mut Vec<u8>, domain: &str, path: &str, mode: u16, size: u64) {
    put_string(out, Some(domain));
    put_string(out, Some(path));
    put_string(out, None);
    put_string(out, None);
    put_string(out, None);
    out.extend_from_slice(&mode.to_be_bytes());
    out.extend_from_slice(&0x12D8u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&501u32.to_be_bytes());
    out.extend_from_slice(&501u32.to_be_bytes());
    out.extend_from_slice(&0x610a911fu32.to_be_bytes());
    out.extend_from_slice(&0x610a914du32.to_be_bytes());
    out.extend_from_slice(&0x6108ed24u32.to_be_bytes());
    out.extend_from_slice(&size.to_be_bytes());
    out.push(if mode & 0x4000 != 0 { 2 } else { 1 });
    out.push(0);
}

fn write_manifest_plist(root: &Path, encrypted: bool) {
    let mut lockdown = Dictionary::new();
    lockdown.insert("ProductVersion".to_string(), Value::String("9.0.1".to_string()));
    let mut manifest = Dictionary::new();
    manifest.insert("IsEncrypted".to_string(), Value::Boolean(encrypted));
    manifest.insert("Lockdown".to_string(), Value::Dictionary(lockdown));
    if encrypted {
        manifest.insert("BackupKeyBag".to_string(), Value::Data(b"VERS".to_vec()));
    }
    Value::Dictionary(manifest)
        .to_file_xml(root.join("Manifest.plist"))
        .unwrap();
}

/// Unencrypted iOS 9 backup with one directory and one file.
fn write_backup(root: &Path) {
    write_manifest_plist(root, false);

    let mut info = Dictionary::new();
    info.insert("IMEI".to_string(), Value::String("356789012345678".to_string()));
    Value::Dictionary(info)
        .to_file_xml(root.join("Info.plist"))
        .unwrap();

    let mut mbdb = b"mbdb\x05\x00".to_vec();
    mbdb_record(&mut mbdb, "MyTestDomain", "Media", 0o040755, 0);
    mbdb_record(&mut mbdb, "MyTestDomain", "Media/Test.txt", 0o100644, 9);
    std::fs::write(root.join("Manifest.mbdb"), mbdb).unwrap();
    std::fs::write(root.join(TEST_FILE_ID), b"Test data").unwrap();
}

#[test]
fn test_list() {
    let backup = tempfile::tempdir().unwrap();
    write_backup(backup.path());

    let mut cmd = get_unback_cmd();
    cmd.arg("--path").arg(backup.path()).arg("list");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "{} MyTestDomain Media/Test.txt file 9",
            TEST_FILE_ID
        )))
        .stdout(predicate::str::contains("MyTestDomain Media dir 0"));
}

#[test]
fn test_list_other_domain_is_empty() {
    let backup = tempfile::tempdir().unwrap();
    write_backup(backup.path());

    let mut cmd = get_unback_cmd();
    cmd.arg("--path")
        .arg(backup.path())
        .arg("list")
        .arg("--domain")
        .arg("HomeDomain");

    cmd.assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn test_stats() {
    let backup = tempfile::tempdir().unwrap();
    write_backup(backup.path());

    let mut cmd = get_unback_cmd();
    cmd.arg("--path").arg(backup.path()).arg("stats");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Product version: 9.0.1"))
        .stdout(predicate::str::contains("IMEI: 356789012345678"))
        .stdout(predicate::str::contains("Date: unknown"))
        .stdout(predicate::str::contains("Files: 1"))
        .stdout(predicate::str::contains("Size: 9 bytes"));
}

#[test]
fn test_stats_json() {
    let backup = tempfile::tempdir().unwrap();
    write_backup(backup.path());

    let mut cmd = get_unback_cmd();
    cmd.arg("--path").arg(backup.path()).arg("stats").arg("--json");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"product_version\": \"9.0.1\""))
        .stdout(predicate::str::contains("\"files_count\": 1"))
        .stdout(predicate::str::contains("\"is_encrypted\": false"));
}

#[test]
fn test_extract_id() {
    let backup = tempfile::tempdir().unwrap();
    write_backup(backup.path());
    let out = tempfile::tempdir().unwrap();

    let mut cmd = get_unback_cmd();
    cmd.arg("--path")
        .arg(backup.path())
        .arg("extract-id")
        .arg("--id")
        .arg(TEST_FILE_ID)
        .arg("--target")
        .arg(out.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(format!("Extracted {}", TEST_FILE_ID)));
    assert_eq!(std::fs::read(out.path().join("Test.txt")).unwrap(), b"Test data");
}

#[test]
fn test_extract_domain_path_missing() {
    let backup = tempfile::tempdir().unwrap();
    write_backup(backup.path());
    let out = tempfile::tempdir().unwrap();

    let mut cmd = get_unback_cmd();
    cmd.arg("--path")
        .arg(backup.path())
        .arg("extract-domain-path")
        .arg("--domain")
        .arg("unknown-domain")
        .arg("--file")
        .arg("unknown-path")
        .arg("--target")
        .arg(out.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("MissingEntry"));
}

#[test]
fn test_unback() {
    let backup = tempfile::tempdir().unwrap();
    write_backup(backup.path());
    let out = tempfile::tempdir().unwrap();

    let mut cmd = get_unback_cmd();
    cmd.arg("--path")
        .arg(backup.path())
        .arg("unback")
        .arg("--target")
        .arg(out.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Extracted 1 files"));
    assert_eq!(
        std::fs::read(out.path().join("MyTestDomain/Media/Test.txt")).unwrap(),
        b"Test data"
    );
}

#[test]
fn test_extract_all_skip_missing() {
    let backup = tempfile::tempdir().unwrap();
    write_backup(backup.path());
    std::fs::remove_file(backup.path().join(TEST_FILE_ID)).unwrap();
    let out = tempfile::tempdir().unwrap();

    let mut strict = get_unback_cmd();
    strict
        .arg("--path")
        .arg(backup.path())
        .arg("extract-all")
        .arg("--target")
        .arg(out.path());
    strict.assert().failure();

    let mut lenient = get_unback_cmd();
    lenient
        .arg("--path")
        .arg(backup.path())
        .arg("extract-all")
        .arg("--target")
        .arg(out.path())
        .arg("--skip-missing");
    lenient
        .assert()
        .success()
        .stdout(predicate::str::contains("Extracted 0 files"))
        .stdout(predicate::str::contains("Failed to extract 1 files:"))
        .stdout(predicate::str::contains(TEST_FILE_ID));
    assert!(out.path().join("Manifest.mbdb").exists());
}

#[test]
fn test_bad_keybag() {
    let backup = tempfile::tempdir().unwrap();
    write_manifest_plist(backup.path(), true);

    let mut cmd = get_unback_cmd();
    cmd.arg("--path")
        .arg(backup.path())
        .arg("--password")
        .arg("0000")
        .arg("stats");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("KeybagFormat"));
}

#[test]
fn test_missing_path() {
    let mut cmd = get_unback_cmd();
    cmd.arg("stats");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Path is required."));
}
