//! E2E tests for the command line tools
//!
//! Runs the `rawtool` and `synchrocap` binaries against sessions in temp
//! directories and checks output and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use synchrocap::framelog::{frame_log_file_name, FrameLog};
use synchrocap::{ContainerWriter, PixelFormat};

const W: u32 = 4;
const H: u32 = 2;

fn record(dir: &Path, serial: &str, frames: u64, drop: Option<u64>) -> Vec<PathBuf> {
    let mut writer = ContainerWriter::create_for(dir, serial, 0, W, H, PixelFormat::BayerGR8, 25).unwrap();
    let mut log = FrameLog::create(&dir.join(frame_log_file_name(serial))).unwrap();
    let mut slot = 0i64;
    for i in 0..frames {
        if drop == Some(i) {
            slot += 1;
        }
        let ts = slot * 20_000_000;
        writer.write_frame(ts, &[i as u8; (W * H) as usize]).unwrap();
        log.append(i, ts).unwrap();
        slot += 1;
    }
    writer.finish().unwrap();
    log.finish().unwrap();
    writer.files().to_vec()
}

fn rawtool() -> Command {
    Command::cargo_bin("rawtool").unwrap()
}

#[test]
fn test_validate_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let files = record(dir.path(), "1001", 60, None);
    record(dir.path(), "1002", 60, None);

    rawtool()
        .arg("validate")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("--- cam1001 ---"))
        .stdout(predicate::str::contains("=== Result: 16/16 PASS (2 cameras) ==="));

    rawtool()
        .arg("validate")
        .arg(dir.path().join("missing"))
        .assert()
        .code(2)
        .stderr(predicate::str::starts_with("Error:"));

    let mut bytes = std::fs::read(&files[0]).unwrap();
    bytes[..4].copy_from_slice(b"XXXX");
    std::fs::write(&files[0], bytes).unwrap();
    rawtool()
        .arg("validate")
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[FAIL] V1"));
}

#[test]
fn test_dump_lists_frames() {
    let dir = tempfile::tempdir().unwrap();
    let files = record(dir.path(), "7", 25, None);

    rawtool()
        .arg("dump")
        .arg(&files[0])
        .assert()
        .success()
        .stdout(predicate::str::contains("frame_index=0 "))
        .stdout(predicate::str::contains("..."));

    rawtool()
        .args(["dump", "--all"])
        .arg(&files[0])
        .assert()
        .success()
        .stdout(predicate::str::contains("frame_index=12 "));
}

#[test]
fn test_sync_check_needs_two_logs() {
    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), "ONLY", 10, None);

    rawtool().arg("sync-check").arg(dir.path()).assert().code(2);

    record(dir.path(), "OTHER", 10, None);
    rawtool()
        .arg("sync-check")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS"));
}

#[test]
fn test_continuity_reports_drops() {
    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), "GAP", 40, Some(10));

    rawtool()
        .args(["continuity", "--fps", "50"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("total_drops=1"));

    rawtool()
        .args(["continuity", "--fps", "50", "--tolerance-ms", "25"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("no frame drops"));
}

#[test]
fn test_view_writes_png() {
    let dir = tempfile::tempdir().unwrap();
    let files = record(dir.path(), "PNG", 3, None);
    let png = dir.path().join("out.png");

    rawtool()
        .args(["view", "--frame", "1", "--output"])
        .arg(&png)
        .arg(&files[0])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved:"));
    let bytes = std::fs::read(&png).unwrap();
    assert_eq!(&bytes[1..4], b"PNG");

    rawtool()
        .args(["view", "--frame", "9"])
        .arg(&files[0])
        .assert()
        .code(2);
}

#[test]
fn test_encode_unknown_serial() {
    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), "E1", 5, None);

    rawtool()
        .args(["encode", "--serial", "NOPE"])
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("NOPE"));
}

#[cfg(unix)]
#[test]
fn test_encode_through_custom_encoder() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), "E2", 50, None);

    let encoder = dir.path().join("fake-encoder.sh");
    std::fs::write(&encoder, "#!/bin/sh\nfor last; do :; done\ncat > \"$last\"\n").unwrap();
    std::fs::set_permissions(&encoder, std::fs::Permissions::from_mode(0o755)).unwrap();

    rawtool()
        .args(["encode", "--serial", "E2", "--fps", "25", "--encoder"])
        .arg(&encoder)
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("MP4 frames: 25"))
        .stdout(predicate::str::contains("Done."));
    let output = std::fs::read(dir.path().join("camE2.mp4")).unwrap();
    assert_eq!(output.len(), 25 * (W * H) as usize);

    let failing = dir.path().join("failing-encoder.sh");
    std::fs::write(&failing, "#!/bin/sh\ncat > /dev/null\nexit 3\n").unwrap();
    std::fs::set_permissions(&failing, std::fs::Permissions::from_mode(0o755)).unwrap();
    std::fs::remove_file(dir.path().join("camE2.mp4")).unwrap();

    rawtool()
        .args(["encode", "--serial", "E2", "--encoder"])
        .arg(&failing)
        .arg(dir.path())
        .assert()
        .code(1);
}

#[test]
fn test_init_config_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    Command::cargo_bin("synchrocap")
        .unwrap()
        .arg("--init-config")
        .arg("--config")
        .arg(&path)
        .assert()
        .success();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("\"frames_per_file\": 1000"));
    assert!(contents.contains("\"output_format\": \"raw\""));
}

#[test]
fn test_short_recording_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("sessions");
    let config = dir.path().join("config.json");
    std::fs::write(
        &config,
        r#"{
            "poll_interval_secs": 0.01,
            "queue_buffer_count": 16,
            "devices": [
                { "serial": "CLI1", "width": 8, "height": 4, "offset_ns": 37000000000 },
                { "serial": "CLI2", "width": 8, "height": 4, "offset_ns": 37000000000 }
            ]
        }"#,
    )
    .unwrap();

    Command::cargo_bin("synchrocap")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["--delay", "0.2", "--duration", "0.3", "--frames-per-file", "5"])
        .arg("--output-dir")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("camCLI1: "))
        .stdout(predicate::str::contains("total frames:"));

    let sessions: Vec<PathBuf> = std::fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(sessions.len(), 1);

    rawtool().arg("validate").arg(&sessions[0]).assert().success();
    rawtool().arg("sync-check").arg(&sessions[0]).assert().success();
}
