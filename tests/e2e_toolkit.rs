//! E2E tests for the offline toolkit
//!
//! Builds synthetic sessions on disk and runs the frame plan, sync check,
//! continuity check and re-encode against them.

use approx::assert_relative_eq;
use std::path::Path;
use synchrocap::framelog::{frame_log_file_name, FrameLog};
use synchrocap::toolkit::{self, PlanClass, ToolkitError};
use synchrocap::{ContainerWriter, PixelFormat};

const W: u32 = 8;
const H: u32 = 4;

/// Container files plus frame log at the given device timestamps
fn record(dir: &Path, serial: &str, timestamps: &[i64]) {
    let mut writer =
        ContainerWriter::create_for(dir, serial, timestamps[0], W, H, PixelFormat::BayerGR8, 100).unwrap();
    let mut log = FrameLog::create(&dir.join(frame_log_file_name(serial))).unwrap();
    for (i, &ts) in timestamps.iter().enumerate() {
        writer.write_frame(ts, &[i as u8; (W * H) as usize]).unwrap();
        log.append(i as u64, ts).unwrap();
    }
    writer.finish().unwrap();
    log.finish().unwrap();
}

fn uniform(count: usize, interval_ns: i64, start: i64) -> Vec<i64> {
    (0..count as i64).map(|i| start + i * interval_ns).collect()
}

/// Scenario D: 50 Hz source planned at 30 fps
#[test]
fn test_downsample_plan_from_session() {
    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), "D50", &uniform(500, 20_000_000, 5_000_000_000));

    let job = toolkit::plan_encode(dir.path(), "D50", 30.0).unwrap();
    assert_eq!(job.plan.sources, 500);
    assert_eq!(job.plan.len(), 300);
    assert_eq!(job.plan.duplicated, 0);
    assert_eq!(job.plan.skipped, 200);
    assert!(matches!(job.plan.class, PlanClass::Downsampled { source_fps } if (source_fps - 50.0).abs() < 1e-6));
    assert_eq!(job.plan.class.to_string(), "downsampled from 50.0 fps");
    assert_eq!(job.files.len(), 5);

    let summary = job.to_string();
    assert!(summary.contains("MP4 frames: 300 (0 duplicated, 200 skipped -- downsampled from 50.0 fps)"));
}

#[test]
fn test_clean_session_passes_every_tool() {
    let dir = tempfile::tempdir().unwrap();
    let ts = uniform(120, 20_000_000, 1_000_000_000);
    record(dir.path(), "A", &ts);
    record(dir.path(), "B", &ts);

    let first = toolkit::validate_session(dir.path()).unwrap();
    let second = toolkit::validate_session(dir.path()).unwrap();
    assert!(first.is_valid(), "{first}");
    assert_eq!(first, second);

    let sync = toolkit::sync_check(dir.path(), 1.0).unwrap();
    assert!(sync.passed());
    assert_eq!(sync.common_frames, 120);
    assert_eq!(sync.stats.max_ns, 0);

    let reports = toolkit::continuity(dir.path(), 50.0, toolkit::DEFAULT_TOLERANCE_MS).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| !r.has_drops()));
}

#[test]
fn test_sync_check_reports_late_camera() {
    let dir = tempfile::tempdir().unwrap();
    let base = uniform(50, 20_000_000, 0);
    let mut late = base.clone();
    for ts in &mut late[30..] {
        *ts += 2_500_000;
    }
    record(dir.path(), "1", &base);
    record(dir.path(), "2", &late);

    let report = toolkit::sync_check(dir.path(), 1.0).unwrap();
    assert!(!report.passed());
    assert_eq!(report.violations.len(), 20);
    assert_eq!(report.violations[0].frame_number, 30);
    assert_eq!(report.violations[0].max_serial, "2");
    assert_eq!(report.violations[0].min_serial, "1");
    assert_eq!(report.stats.max_ns, 2_500_000);
}

#[test]
fn test_continuity_finds_dropped_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut ts = uniform(60, 20_000_000, 0);
    ts.remove(25);
    record(dir.path(), "DROP", &ts);

    let reports = toolkit::continuity(dir.path(), 50.0, 5.0).unwrap();
    let report = &reports[0];
    assert!(report.has_drops());
    assert_eq!(report.issues.len(), 1);
    let issue = &report.issues[0];
    assert_relative_eq!(issue.dt_ms, 40.0);
    assert_relative_eq!(issue.diff_ms, 20.0);
    assert_eq!(issue.cur_line, 27);
}

#[test]
fn test_tools_reject_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        toolkit::validate_session(dir.path()),
        Err(ToolkitError::NoSessionFiles(_))
    ));
    assert!(matches!(
        toolkit::sync_check(dir.path(), 1.0),
        Err(ToolkitError::NotEnoughLogs { found: 0 })
    ));
    assert!(matches!(
        toolkit::plan_encode(dir.path(), "X", 30.0),
        Err(ToolkitError::UnknownSerial { .. })
    ));
}

#[cfg(unix)]
#[test]
fn test_encode_pipes_planned_frames() {
    use synchrocap::recording::EncoderSettings;

    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), "ENC", &uniform(50, 20_000_000, 0));
    let settings = EncoderSettings {
        program: "sh".to_string(),
        program_args: vec![
            "-c".to_string(),
            r#"for last; do :; done; cat > "$last""#.to_string(),
            "sh".to_string(),
        ],
        ..Default::default()
    };

    let job = toolkit::encode_device(dir.path(), "ENC", 25.0, &settings).unwrap();
    let written = std::fs::read(&job.output).unwrap();
    assert_eq!(written.len(), job.plan.len() * (W * H) as usize);
    // Every other source frame at half the rate
    let firsts: Vec<u8> = written.chunks((W * H) as usize).map(|c| c[0]).take(4).collect();
    assert_eq!(firsts, vec![0, 2, 4, 6]);

    assert!(matches!(
        toolkit::plan_encode(dir.path(), "ENC", 25.0),
        Err(ToolkitError::OutputExists(_))
    ));
}
