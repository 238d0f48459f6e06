//! Frame interval continuity of frame logs
//!
//! Consecutive rows should be `1000 / fps` ms apart. An interval outside
//! `expected ± tolerance` marks a dropped or stalled frame.

use super::ToolkitError;
use crate::container::discover_session;
use crate::framelog::{read_frame_log, FrameLogRow};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOLERANCE_MS: f64 = 5.0;

/// First data row of a frame log, after the header
const FIRST_DATA_LINE: usize = 2;

/// An abnormal interval between two consecutive rows
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityIssue {
    pub prev_line: usize,
    pub cur_line: usize,
    pub prev_frame: u64,
    pub cur_frame: u64,
    pub prev_ts: i64,
    pub cur_ts: i64,
    pub dt_ms: f64,
    /// `dt_ms` minus the expected interval
    pub diff_ms: f64,
}

impl fmt::Display for ContinuityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - lines {}->{} (frames {:05}->{:05}): ts {}->{} dt_ms={:.3} diff={:+.3} ms",
            self.prev_line,
            self.cur_line,
            self.prev_frame,
            self.cur_frame,
            self.prev_ts,
            self.cur_ts,
            self.dt_ms,
            self.diff_ms
        )
    }
}

/// Flag every interval of `rows` outside `1000 / fps ± tolerance_ms`
pub fn check_continuity(rows: &[FrameLogRow], fps: f64, tolerance_ms: f64) -> Vec<ContinuityIssue> {
    let expected = 1000.0 / fps;
    let (lower, upper) = (expected - tolerance_ms, expected + tolerance_ms);

    rows.windows(2)
        .enumerate()
        .filter_map(|(i, pair)| {
            let (prev, cur) = (pair[0], pair[1]);
            let dt_ms = (cur.timestamp_ns - prev.timestamp_ns) as f64 / 1e6;
            (dt_ms < lower || dt_ms > upper).then(|| ContinuityIssue {
                prev_line: i + FIRST_DATA_LINE,
                cur_line: i + 1 + FIRST_DATA_LINE,
                prev_frame: prev.frame_number,
                cur_frame: cur.frame_number,
                prev_ts: prev.timestamp_ns,
                cur_ts: cur.timestamp_ns,
                dt_ms,
                diff_ms: dt_ms - expected,
            })
        })
        .collect()
}

/// Continuity result for one frame log
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityReport {
    pub path: PathBuf,
    pub fps: f64,
    pub tolerance_ms: f64,
    pub rows: usize,
    pub issues: Vec<ContinuityIssue>,
}

impl ContinuityReport {
    pub fn expected_dt_ms(&self) -> f64 {
        1000.0 / self.fps
    }

    pub fn has_drops(&self) -> bool {
        !self.issues.is_empty()
    }
}

impl fmt::Display for ContinuityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writeln!(f, "{name}:")?;
        writeln!(
            f,
            "  - fps={} expected_dt_ms={:.3} (±{:.1} ms)",
            self.fps,
            self.expected_dt_ms(),
            self.tolerance_ms
        )?;
        if self.issues.is_empty() {
            writeln!(f, "  - no frame drops")?;
        } else {
            writeln!(f, "  - drops:")?;
            for issue in &self.issues {
                writeln!(f, "{issue}")?;
            }
        }
        write!(f, "  - total_drops={}", self.issues.len())
    }
}

fn check_rate(fps: f64, tolerance_ms: f64) -> Result<(), ToolkitError> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(ToolkitError::InvalidArgument(format!("fps must be > 0, got {fps}")));
    }
    if !(tolerance_ms.is_finite() && tolerance_ms >= 0.0) {
        return Err(ToolkitError::InvalidArgument(format!(
            "tolerance must be >= 0 ms, got {tolerance_ms}"
        )));
    }
    Ok(())
}

/// Check a single frame log file
pub fn continuity_for_log(path: &Path, fps: f64, tolerance_ms: f64) -> Result<ContinuityReport, ToolkitError> {
    check_rate(fps, tolerance_ms)?;
    if !path.is_file() {
        return Err(ToolkitError::NotFound(path.to_path_buf()));
    }
    let rows = read_frame_log(path)?;
    let issues = check_continuity(&rows, fps, tolerance_ms);
    if !issues.is_empty() {
        tracing::warn!(path = %path.display(), drops = issues.len(), "Frame interval drops found");
    }
    Ok(ContinuityReport {
        path: path.to_path_buf(),
        fps,
        tolerance_ms,
        rows: rows.len(),
        issues,
    })
}

/// Check every frame log in a session directory, in serial order
pub fn continuity(dir: &Path, fps: f64, tolerance_ms: f64) -> Result<Vec<ContinuityReport>, ToolkitError> {
    check_rate(fps, tolerance_ms)?;
    if !dir.is_dir() {
        return Err(ToolkitError::NotFound(dir.to_path_buf()));
    }
    let logs: Vec<PathBuf> = discover_session(dir)?
        .into_iter()
        .filter_map(|d| d.frame_log)
        .collect();
    if logs.is_empty() {
        return Err(ToolkitError::NoSessionFiles(dir.to_path_buf()));
    }
    logs.iter()
        .map(|path| continuity_for_log(path, fps, tolerance_ms))
        .collect()
}
