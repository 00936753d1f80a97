//! End-to-end tests for the complete extraction flow.
//!
//! Tests the full pipeline: source -> runner log windows -> remote tarballs
//! -> per-test fragments, by driving the built binary.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const REMOTE_LOGS_DIR: &str = "ansible-playbooks/playbooks/ovirt-collect-logs/logs";

fn artlog_binary() -> String {
    env!("CARGO_BIN_EXE_artlog").to_string()
}

/// Runs artlog with an isolated home directory so no user config leaks in.
fn run_artlog(home: &Path, args: &[&str]) -> Output {
    Command::new(artlog_binary())
        .env("HOME", home)
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to run artlog")
}

fn runner_line(time: &str, message: &str) -> String {
    format!("2024-03-01 {time},000 - MainThread - art.logging - INFO - {message}\n")
}

fn runner_log() -> String {
    let mut log = String::new();
    for (name, setup, teardown) in [
        ("network.test_nic", "09:00:00", "09:05:00"),
        ("storage.test_disk.TestCase1", "10:00:00", "10:05:00"),
        ("storage.test_disk.TestCase2", "10:10:00", "10:15:00"),
    ] {
        log.push_str(&runner_line(setup, &format!("SETUP <TestCase {name}>")));
        log.push_str(&runner_line(setup, &format!("Test Name: rhevmtests.{name}")));
        log.push_str(&runner_line(teardown, &format!("TEARDOWN <TestCase {name}>")));
    }
    log
}

fn engine_log() -> String {
    ["09:02:00", "10:01:00", "10:12:00"]
        .iter()
        .map(|time| format!("2024-03-01 {time},000+01 INFO [org.ovirt.engine] at {time}\n"))
        .collect()
}

fn vdsm_log() -> String {
    ["10:02:00", "10:13:00"]
        .iter()
        .map(|time| format!("vdsm.api::INFO::2024-03-01 {time},000::api::at {time}\n"))
        .collect()
}

fn tar_gz(member: &str, text: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(text.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, member, text.as_bytes()).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Artifact tree as `(path, bytes)` pairs.
fn artifact_files() -> Vec<(String, Vec<u8>)> {
    vec![
        ("logs/art_test_runner.log".to_string(), runner_log().into_bytes()),
        (
            format!("{REMOTE_LOGS_DIR}/hosted-engine/logs.tar.gz"),
            tar_gz("var/log/ovirt-engine/engine.log", &engine_log()),
        ),
        (
            format!("{REMOTE_LOGS_DIR}/lynx01-hypervisor/logs.tar.gz"),
            tar_gz("var/log/vdsm/vdsm.log", &vdsm_log()),
        ),
    ]
}

fn write_artifact_dir(root: &Path) {
    for (path, bytes) in artifact_files() {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }
}

fn write_artifact_zip(path: &Path) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in artifact_files() {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(&bytes).unwrap();
    }
    writer.finish().unwrap();
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "artlog should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn scratch_dirs(out: &Path) -> Vec<PathBuf> {
    fs::read_dir(out)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("tempdir"))
        })
        .collect()
}

fn assert_bundles(out: &Path) {
    let case1 = out.join("storage/test_disk/TestCase1");
    let case2 = out.join("storage/test_disk/TestCase2");
    for dir in [&case1, &case2] {
        assert!(dir.join("art_test_runner.log").is_file(), "{}", dir.display());
    }

    let engine = fs::read_to_string(case1.join("engine.log")).unwrap();
    assert_eq!(engine.lines().count(), 1);
    assert!(engine.contains("at 10:01:00"));
    let engine = fs::read_to_string(case2.join("engine.log")).unwrap();
    assert!(engine.contains("at 10:12:00"));

    let vdsm = fs::read_to_string(case1.join("lynx01-hypervisor_vdsm.log")).unwrap();
    assert!(vdsm.contains("at 10:02:00"));
    assert!(!vdsm.contains("at 10:13:00"));
    assert!(case2.join("lynx01-hypervisor_vdsm.log").is_file());
}

#[test]
fn test_directory_source_with_team_filter() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("artifacts");
    let out = temp.path().join("out");
    write_artifact_dir(&source);

    let output = run_artlog(
        temp.path(),
        &[
            "--source",
            source.to_str().unwrap(),
            "--folder",
            out.to_str().unwrap(),
            "--team",
            "storage",
        ],
    );
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Extracted 2 tests"));

    assert_bundles(&out);
    // The network test precedes the storage block and is filtered out.
    assert!(!out.join("rhevmtests").exists());
    assert!(scratch_dirs(&out).is_empty(), "scratch directory should be removed");
}

#[test]
fn test_zip_source_without_filter() {
    let temp = TempDir::new().unwrap();
    let zip = temp.path().join("archive.zip");
    let out = temp.path().join("out");
    write_artifact_zip(&zip);

    let output = run_artlog(
        temp.path(),
        &["-s", zip.to_str().unwrap(), "-f", out.to_str().unwrap()],
    );
    assert_success(&output);

    assert_bundles(&out);
    let network = out.join("rhevmtests/network/test_nic");
    assert!(network.join("art_test_runner.log").is_file());
    let engine = fs::read_to_string(network.join("engine.log")).unwrap();
    assert!(engine.contains("at 09:02:00"));
}

#[test]
fn test_logs_flag_limits_kinds() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("artifacts");
    let out = temp.path().join("out");
    write_artifact_dir(&source);

    let output = run_artlog(
        temp.path(),
        &[
            "-s",
            source.to_str().unwrap(),
            "-f",
            out.to_str().unwrap(),
            "--logs",
            "engine.log",
        ],
    );
    assert_success(&output);

    let case1 = out.join("storage/test_disk/TestCase1");
    assert!(case1.join("engine.log").is_file());
    assert!(!case1.join("lynx01-hypervisor_vdsm.log").exists());
}

#[test]
fn test_no_clean_keeps_scratch_and_log_output() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("artifacts");
    let out = temp.path().join("out");
    let log_file = temp.path().join("artlog.log");
    write_artifact_dir(&source);

    let output = run_artlog(
        temp.path(),
        &[
            "-s",
            source.to_str().unwrap(),
            "-f",
            out.to_str().unwrap(),
            "--no-clean",
            "-vv",
            "--log-output",
            log_file.to_str().unwrap(),
        ],
    );
    assert_success(&output);

    let scratch = scratch_dirs(&out);
    assert_eq!(scratch.len(), 1);
    assert!(scratch[0].join("host-logs/lynx01-hypervisor.tar.gz").is_file());

    let diagnostics = fs::read_to_string(&log_file).unwrap();
    assert!(diagnostics.contains("extracted test windows"));
    assert!(!diagnostics.contains('\u{1b}'), "log file should not contain ANSI escapes");
}

#[test]
fn test_config_file_sets_output_folder() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("artifacts");
    let out = temp.path().join("configured");
    write_artifact_dir(&source);
    let config = temp.path().join("artlog.toml");
    fs::write(&config, format!("output_folder = {:?}\n", out.to_str().unwrap())).unwrap();

    let output = run_artlog(
        temp.path(),
        &["-s", source.to_str().unwrap(), "--config", config.to_str().unwrap()],
    );
    assert_success(&output);
    assert!(out.join("storage/test_disk/TestCase1/engine.log").is_file());
}

#[test]
fn test_missing_runner_log_fails() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("artifacts");
    fs::create_dir_all(source.join("logs")).unwrap();
    let out = temp.path().join("out");

    let output = run_artlog(
        temp.path(),
        &["-s", source.to_str().unwrap(), "-f", out.to_str().unwrap()],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to find ART runner logs"), "{stderr}");
    assert!(scratch_dirs(&out).is_empty());
}

#[test]
fn test_unsupported_source_fails() {
    let temp = TempDir::new().unwrap();
    let output = run_artlog(temp.path(), &["-s", "ftp://example.com/archive.zip"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unsupported source"));
}
