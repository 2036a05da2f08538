use std::fs;

mod common;

fn stdout(cmd: &mut std::process::Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_cli_help() {
    let help = stdout(common::run_cli().arg("--help"));
    for command in ["recover", "compact", "log", "tables"] {
        assert!(help.contains(command), "{command} missing from help");
    }
}

#[test]
fn test_recover_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let db_dir = dir.path().join("db");

    let out = stdout(common::run_cli().arg("recover").arg(&db_dir));
    assert!(out.contains("0 tables"));
    assert!(dir.path().join("db-recovery").is_dir());

    // Recovery closes with a checkpoint.
    let log = stdout(common::run_cli().arg("log").arg(&db_dir));
    assert_eq!(log.lines().collect::<Vec<_>>(), vec!["checkpoint"]);
}

#[test]
fn test_recover_replays_log() {
    let dir = tempfile::tempdir().unwrap();
    let db_dir = dir.path().join("db");
    let committed = "8c4c7d1e-5d47-4a8e-9f86-0f3b2b0c4a11";
    let uncommitted = "0b7e9f52-2c1d-4f0a-8a57-3f6f2e5d9c20";
    fs::create_dir_all(&db_dir).unwrap();
    fs::write(
        db_dir.join("mossdb.log"),
        format!(
            "table btree t\n\
             start {committed}\n\
             insert {committed} t 1 0 10\n\
             commit {committed}\n\
             start {uncommitted}\n\
             update {uncommitted} t 1 10 11\n\
             insert {uncommitted} t 2 0 20\n"
        ),
    )
    .unwrap();

    stdout(common::run_cli().arg("recover").arg(&db_dir));
    let tables = stdout(common::run_cli().args(["tables", "--entries"]).arg(&db_dir));
    assert_eq!(tables, "t btree 1\n  1=10\n");

    let tail = stdout(
        common::run_cli()
            .args(["log", "--since-checkpoint"])
            .arg(&db_dir),
    );
    assert_eq!(tail, "checkpoint\n");
}

#[test]
fn test_custom_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let db_dir = dir.path().join("db");

    stdout(
        common::run_cli()
            .args(["--log-file", "wal.txt", "--snapshot-suffix", ".snap", "compact"])
            .arg(&db_dir),
    );
    assert!(db_dir.join("wal.txt").is_file());
    assert!(!db_dir.join("mossdb.log").exists());
    assert!(dir.path().join("db.snap").is_dir());
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    for command in ["log", "tables"] {
        let output = common::run_cli().arg(command).arg(&missing).output().unwrap();
        assert!(!output.status.success());
    }
    assert!(!missing.exists());
}
