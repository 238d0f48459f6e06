//! Cross-camera timestamp spread
//!
//! Frame logs are joined on frame number. For every frame number present in
//! all logs the spread is `max - min` of the cameras' timestamps.

use super::ToolkitError;
use crate::container::discover_session;
use crate::framelog::read_frame_log;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Violations listed in the report text
pub const MAX_VIOLATIONS_SHOWN: usize = 10;

/// A frame whose spread exceeds the threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncViolation {
    pub frame_number: u64,
    pub spread_ns: i64,
    /// First camera, in serial order, holding the latest timestamp
    pub max_serial: String,
    /// First camera, in serial order, holding the earliest timestamp
    pub min_serial: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStats {
    pub mean_ns: f64,
    pub max_ns: i64,
    /// Element `min(floor(0.99 * n), n - 1)` of the sorted spreads
    pub p99_ns: i64,
}

/// Mean, max and p99 of per-frame spreads, `None` when empty
pub fn sync_stats(spreads: &[i64]) -> Option<SyncStats> {
    let max_ns = *spreads.iter().max()?;
    let mean_ns = spreads.iter().map(|&s| s as f64).sum::<f64>() / spreads.len() as f64;

    let mut sorted = spreads.to_vec();
    sorted.sort_unstable();
    let p99_index = ((sorted.len() as f64 * 0.99) as usize).min(sorted.len() - 1);

    Some(SyncStats {
        mean_ns,
        max_ns,
        p99_ns: sorted[p99_index],
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub dir: PathBuf,
    /// Cameras compared, sorted
    pub serials: Vec<String>,
    /// Cameras without a frame log
    pub skipped: Vec<String>,
    pub threshold_ms: f64,
    pub common_frames: usize,
    pub stats: SyncStats,
    pub violations: Vec<SyncViolation>,
}

impl SyncReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

fn ms(ns: f64) -> f64 {
    ns / 1_000_000.0
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Sync Check: {} ===", self.dir.display())?;
        writeln!(f)?;
        writeln!(f, "Cameras: {}", self.serials.join(", "))?;
        writeln!(f, "Common frames: {}", self.common_frames)?;
        writeln!(f, "Threshold: {:.3} ms", self.threshold_ms)?;
        writeln!(f)?;

        writeln!(f, "--- Statistics (max-min per frame) ---")?;
        writeln!(f, "  mean:  {:.3} ms", ms(self.stats.mean_ns))?;
        writeln!(f, "  max:   {:.3} ms", ms(self.stats.max_ns as f64))?;
        writeln!(f, "  p99:   {:.3} ms", ms(self.stats.p99_ns as f64))?;
        writeln!(f)?;

        writeln!(f, "--- Threshold violations ({} frames) ---", self.violations.len())?;
        if self.violations.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for v in self.violations.iter().take(MAX_VIOLATIONS_SHOWN) {
            writeln!(
                f,
                "  frame={:05}  max-min={:.3} ms  (max: {}, min: {})",
                v.frame_number,
                ms(v.spread_ns as f64),
                v.max_serial,
                v.min_serial
            )?;
        }
        if self.violations.len() > MAX_VIOLATIONS_SHOWN {
            writeln!(
                f,
                "  ... ({} more violations omitted)",
                self.violations.len() - MAX_VIOLATIONS_SHOWN
            )?;
        }
        writeln!(f)?;

        if self.passed() {
            write!(f, "=== Result: PASS ===")
        } else {
            write!(
                f,
                "=== Result: FAIL ({} frames exceed threshold) ===",
                self.violations.len()
            )
        }
    }
}

/// Compare the frame logs of every camera in `dir`
///
/// # Errors
///
/// Input errors when `dir` is missing, fewer than two cameras have a frame
/// log, a log cannot be parsed, or the logs share no frame number.
pub fn sync_check(dir: &Path, threshold_ms: f64) -> Result<SyncReport, ToolkitError> {
    if !dir.is_dir() {
        return Err(ToolkitError::NotFound(dir.to_path_buf()));
    }
    if !(threshold_ms.is_finite() && threshold_ms >= 0.0) {
        return Err(ToolkitError::InvalidArgument(format!(
            "threshold must be a non-negative number of ms, got {threshold_ms}"
        )));
    }
    let threshold_ns = (threshold_ms * 1_000_000.0) as i64;

    let mut skipped = Vec::new();
    let mut cameras: Vec<(String, BTreeMap<u64, i64>)> = Vec::new();
    for device in discover_session(dir)? {
        let Some(path) = &device.frame_log else {
            tracing::warn!(serial = %device.serial, "No frame log, skipping camera");
            skipped.push(device.serial);
            continue;
        };
        let rows = read_frame_log(path)?;
        let timestamps: BTreeMap<u64, i64> = rows.iter().map(|r| (r.frame_number, r.timestamp_ns)).collect();
        cameras.push((device.serial, timestamps));
    }

    if cameras.len() < 2 {
        return Err(ToolkitError::NotEnoughLogs {
            found: cameras.len(),
        });
    }

    let mut common: BTreeSet<u64> = cameras[0].1.keys().copied().collect();
    for (_, timestamps) in &cameras[1..] {
        common.retain(|n| timestamps.contains_key(n));
    }
    if common.is_empty() {
        return Err(ToolkitError::NoCommonFrames);
    }

    let mut spreads = Vec::with_capacity(common.len());
    let mut violations = Vec::new();
    for &frame_number in &common {
        let mut max: Option<(&str, i64)> = None;
        let mut min: Option<(&str, i64)> = None;
        for (serial, timestamps) in &cameras {
            let Some(&ts) = timestamps.get(&frame_number) else {
                continue;
            };
            if max.map_or(true, |(_, m)| ts > m) {
                max = Some((serial.as_str(), ts));
            }
            if min.map_or(true, |(_, m)| ts < m) {
                min = Some((serial.as_str(), ts));
            }
        }
        let (Some((max_serial, max_ts)), Some((min_serial, min_ts))) = (max, min) else {
            continue;
        };

        let spread = max_ts - min_ts;
        spreads.push(spread);
        if spread > threshold_ns {
            violations.push(SyncViolation {
                frame_number,
                spread_ns: spread,
                max_serial: max_serial.to_string(),
                min_serial: min_serial.to_string(),
            });
        }
    }

    let stats = sync_stats(&spreads).ok_or(ToolkitError::NoCommonFrames)?;
    let report = SyncReport {
        dir: dir.to_path_buf(),
        serials: cameras.into_iter().map(|(serial, _)| serial).collect(),
        skipped,
        threshold_ms,
        common_frames: spreads.len(),
        stats,
        violations,
    };
    tracing::info!(
        dir = %dir.display(),
        cameras = report.serials.len(),
        frames = report.common_frames,
        violations = report.violations.len(),
        max_ns = report.stats.max_ns,
        "Sync check finished"
    );
    Ok(report)
}
