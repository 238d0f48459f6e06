//! E2E tests for SRAW container storage
//!
//! Writes split container sessions with frame logs and reads them back
//! through discovery, frame location and validation.

use std::fs::File;
use std::path::Path;
use synchrocap::container::{container_file_name, discover_session, read_frame_payload};
use synchrocap::framelog::{frame_log_file_name, read_frame_log, FrameLog};
use synchrocap::toolkit;
use synchrocap::{ContainerWriter, FrameLocations, PixelFormat};

const W: u32 = 16;
const H: u32 = 8;
const INTERVAL_NS: i64 = 20_000_000;

fn payload(i: u64) -> Vec<u8> {
    (0..W * H).map(|p| (i as u32 + p) as u8).collect()
}

/// Record `frames` frames of camera `serial` with a matching frame log
fn record(dir: &Path, serial: &str, frames: u64, frames_per_file: u32) -> Vec<std::path::PathBuf> {
    let start = 1_700_000_000_000_000_000i64;
    let mut writer =
        ContainerWriter::create_for(dir, serial, start, W, H, PixelFormat::BayerGR8, frames_per_file).unwrap();
    let mut log = FrameLog::create(&dir.join(frame_log_file_name(serial))).unwrap();
    for i in 0..frames {
        let ts = start + i as i64 * INTERVAL_NS;
        writer.write_frame(ts, &payload(i)).unwrap();
        log.append(i, ts).unwrap();
    }
    writer.finish().unwrap();
    log.finish().unwrap();
    writer.files().to_vec()
}

/// Scenario B: 2500 frames split every 1000
#[test]
fn test_split_files_keep_global_indices() {
    let dir = tempfile::tempdir().unwrap();
    let files = record(dir.path(), "49120001", 2500, 1000);

    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "cam49120001_000000.raw",
            "cam49120001_001000.raw",
            "cam49120001_002000.raw"
        ]
    );

    let mut indices = Vec::new();
    for (n, path) in files.iter().enumerate() {
        let frames: Vec<_> = FrameLocations::open(path).unwrap().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), if n < 2 { 1000 } else { 500 });
        indices.extend(frames.iter().map(|f| f.frame_index));
    }
    assert_eq!(indices, (0..2500).collect::<Vec<u64>>());

    let validation = toolkit::validate_session(dir.path()).unwrap();
    assert!(validation.is_valid(), "{validation}");
    let device = validation.device("49120001").unwrap();
    assert_eq!(device.check("V5").unwrap().message, "frame_index continuous (0..2499)");
}

#[test]
fn test_frames_read_back_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let files = record(dir.path(), "RT", 30, 12);
    let rows = read_frame_log(&dir.path().join("camRT.csv")).unwrap();
    assert_eq!(rows.len(), 30);

    let mut seen = 0u64;
    for path in &files {
        let mut file = File::open(path).unwrap();
        for info in FrameLocations::open(path).unwrap() {
            let info = info.unwrap();
            let row = &rows[info.frame_index as usize];
            assert_eq!(row.frame_number, info.frame_index);
            assert_eq!(row.timestamp_ns, info.timestamp_ns);
            assert_eq!(info.payload_size, W * H);
            assert_eq!(read_frame_payload(&mut file, &info).unwrap(), payload(info.frame_index));
            seen += 1;
        }
    }
    assert_eq!(seen, 30);
}

#[test]
fn test_discovery_orders_cameras_and_files() {
    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), "B", 5, 2);
    record(dir.path(), "A", 3, 2);
    std::fs::write(dir.path().join("notes.txt"), "not a camera").unwrap();

    let devices = discover_session(dir.path()).unwrap();
    let serials: Vec<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
    assert_eq!(serials, vec!["A", "B"]);

    let b = &devices[1];
    let firsts: Vec<u64> = b.containers.iter().map(|(first, _)| *first).collect();
    assert_eq!(firsts, vec![0, 2, 4]);
    assert_eq!(b.containers[2].1, dir.path().join(container_file_name("B", 4)));
    assert_eq!(b.frame_log.as_deref(), Some(dir.path().join("camB.csv").as_path()));
}

#[test]
fn test_truncated_tail_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let files = record(dir.path(), "T", 10, 100);
    let len = std::fs::metadata(&files[0]).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&files[0]).unwrap();
    file.set_len(len - 7).unwrap();

    let validation = toolkit::validate_session(dir.path()).unwrap();
    assert!(!validation.is_valid());
    assert_eq!(validation.device("T").unwrap().read_errors.len(), 1);
}
