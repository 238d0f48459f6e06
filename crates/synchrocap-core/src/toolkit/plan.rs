//! Constant-rate frame selection for re-encoding
//!
//! Output frame `i` shows the last source frame captured at or before
//! `first + i / target_fps`. Targets run up to and including the last source
//! timestamp. A source frame picked more than once is a duplicate, one never
//! picked is skipped.

use super::ToolkitError;
use std::collections::HashSet;
use std::fmt;

/// Source and target rates within this fraction are "similar"
const FPS_SIMILAR_RATIO: f64 = 0.10;

/// Mismatches below this fraction of the output are jitter
const MISMATCH_RATIO_LIMIT: f64 = 0.02;

/// How the selection relates to the source timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanClass {
    ExactMatch,
    TimestampJitter,
    Downsampled { source_fps: f64 },
    Upsampled { source_fps: f64 },
    SignificantMismatch,
}

impl fmt::Display for PlanClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactMatch => f.write_str("exact match"),
            Self::TimestampJitter => f.write_str("timestamp jitter"),
            Self::Downsampled { source_fps } => write!(f, "downsampled from {source_fps:.1} fps"),
            Self::Upsampled { source_fps } => write!(f, "upsampled from {source_fps:.1} fps"),
            Self::SignificantMismatch => f.write_str("WARNING: significant mismatch"),
        }
    }
}

/// Output frame selection over a camera's source frames
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlan {
    /// Source frame position for each output frame
    pub selection: Vec<usize>,
    pub sources: usize,
    pub duplicated: usize,
    pub skipped: usize,
    /// Last minus first source timestamp
    pub span_ns: i64,
    /// `(sources - 1) / span`, zero for a zero span
    pub source_fps: f64,
    pub target_fps: f64,
    pub class: PlanClass,
}

impl FramePlan {
    pub fn len(&self) -> usize {
        self.selection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selection.is_empty()
    }

    pub fn span_secs(&self) -> f64 {
        self.span_ns as f64 / 1e9
    }
}

/// Build the selection for source `timestamps` (ns, capture order)
///
/// Offsets from the first timestamp are compared as `f64`, absolute device
/// timestamps being too large for exact `f64` arithmetic.
///
/// # Errors
///
/// [`ToolkitError::InvalidArgument`] when `target_fps` is not a positive
/// finite number.
pub fn build_frame_plan(timestamps: &[i64], target_fps: f64) -> Result<FramePlan, ToolkitError> {
    if !(target_fps.is_finite() && target_fps > 0.0) {
        return Err(ToolkitError::InvalidArgument(format!(
            "fps must be positive, got {target_fps}"
        )));
    }

    let (Some(&first), Some(&last)) = (timestamps.first(), timestamps.last()) else {
        return Ok(FramePlan {
            selection: Vec::new(),
            sources: 0,
            duplicated: 0,
            skipped: 0,
            span_ns: 0,
            source_fps: 0.0,
            target_fps,
            class: PlanClass::ExactMatch,
        });
    };

    let span_ns = last - first;
    let span = span_ns as f64;
    let interval_ns = 1e9 / target_fps;

    let mut selection = Vec::new();
    let mut source = 0usize;
    let mut output = 0u64;
    loop {
        let target = output as f64 * interval_ns;
        if target > span {
            break;
        }
        while source + 1 < timestamps.len() && ((timestamps[source + 1] - first) as f64) <= target {
            source += 1;
        }
        selection.push(source);
        output += 1;
    }

    let unique = selection.iter().collect::<HashSet<_>>().len();
    let duplicated = selection.len() - unique;
    let skipped = timestamps.len() - unique;
    let source_fps = if span_ns > 0 {
        (timestamps.len() - 1) as f64 / (span / 1e9)
    } else {
        0.0
    };
    let class = classify_plan(source_fps, target_fps, duplicated, skipped, selection.len());

    tracing::debug!(
        sources = timestamps.len(),
        outputs = selection.len(),
        duplicated,
        skipped,
        class = %class,
        "Frame plan built"
    );

    Ok(FramePlan {
        selection,
        sources: timestamps.len(),
        duplicated,
        skipped,
        span_ns,
        source_fps,
        target_fps,
        class,
    })
}

/// Classify a selection by its duplicate and skip counts
pub fn classify_plan(
    source_fps: f64,
    target_fps: f64,
    duplicated: usize,
    skipped: usize,
    outputs: usize,
) -> PlanClass {
    if duplicated == 0 && skipped == 0 {
        return PlanClass::ExactMatch;
    }

    let mismatch_ratio = if outputs > 0 {
        (duplicated + skipped) as f64 / outputs as f64
    } else {
        0.0
    };
    let fps_diff_ratio = if target_fps > 0.0 {
        (source_fps - target_fps).abs() / target_fps
    } else {
        0.0
    };

    if fps_diff_ratio < FPS_SIMILAR_RATIO && mismatch_ratio < MISMATCH_RATIO_LIMIT {
        PlanClass::TimestampJitter
    } else if source_fps > target_fps && skipped > duplicated {
        PlanClass::Downsampled { source_fps }
    } else if source_fps < target_fps && duplicated > skipped {
        PlanClass::Upsampled { source_fps }
    } else if mismatch_ratio >= MISMATCH_RATIO_LIMIT {
        PlanClass::SignificantMismatch
    } else {
        PlanClass::TimestampJitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Device-clock sized base so the f64 path is exercised
    const BASE: i64 = 1_718_000_000_123_456_789;

    fn uniform(count: usize, rate_hz: f64) -> Vec<i64> {
        let interval = (1e9 / rate_hz).round() as i64;
        (0..count as i64).map(|i| BASE + i * interval).collect()
    }

    #[test]
    fn test_same_rate_is_exact() {
        let ts = uniform(300, 50.0);
        let plan = build_frame_plan(&ts, 50.0).unwrap();
        assert_eq!(plan.len(), 300);
        assert_eq!(plan.selection, (0..300).collect::<Vec<_>>());
        assert_eq!(plan.class, PlanClass::ExactMatch);
        assert_relative_eq!(plan.source_fps, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_downsample_50_to_30() {
        let n = 500;
        let ts = uniform(n, 50.0);
        let plan = build_frame_plan(&ts, 30.0).unwrap();

        let expected_skipped = n as f64 * (1.0 - 30.0 / 50.0);
        assert!((plan.skipped as f64 - expected_skipped).abs() <= 2.0, "skipped {}", plan.skipped);
        assert_eq!(plan.duplicated, 0);
        assert_eq!(plan.class.to_string(), "downsampled from 50.0 fps");
    }

    #[test]
    fn test_upsample_25_to_30() {
        let ts = uniform(250, 25.0);
        let plan = build_frame_plan(&ts, 30.0).unwrap();
        // The last source frame lands after the final target
        assert!(plan.skipped <= 1);
        assert!(plan.duplicated > 40);
        assert_eq!(plan.class.to_string(), "upsampled from 25.0 fps");
    }

    #[test]
    fn test_conservation() {
        for (count, rate, fps) in [(500, 50.0, 30.0), (333, 29.7, 30.0), (120, 24.0, 60.0), (77, 60.0, 25.0)] {
            let ts = uniform(count, rate);
            let plan = build_frame_plan(&ts, fps).unwrap();
            let unique = plan.selection.iter().collect::<HashSet<_>>().len();

            let expected_len = (plan.span_secs() * fps).round() as i64;
            assert!((plan.len() as i64 - expected_len).abs() <= 1, "len {} vs {expected_len}", plan.len());
            assert_eq!(plan.duplicated, plan.len() - unique);
            assert_eq!(
                plan.duplicated as i64 - plan.skipped as i64,
                plan.len() as i64 - count as i64
            );
        }
    }

    #[test]
    fn test_selection_is_floor_and_monotonic() {
        let ts = vec![BASE, BASE + 10_000_000, BASE + 45_000_000, BASE + 50_000_000, BASE + 100_000_000];
        // 50 fps targets at 0, 20, 40, 60, 80, 100 ms
        let plan = build_frame_plan(&ts, 50.0).unwrap();
        assert_eq!(plan.selection, vec![0, 1, 1, 3, 3, 4]);
        assert_eq!(plan.duplicated, 2);
        assert_eq!(plan.skipped, 1);
        assert!(plan.selection.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_jitter_classification() {
        let mut ts = uniform(200, 50.0);
        // One late frame shifts a single pick
        ts[100] += 15_000_000;
        let plan = build_frame_plan(&ts, 50.0).unwrap();
        assert_eq!(plan.duplicated, 1);
        assert_eq!(plan.skipped, 1);
        assert_eq!(plan.class, PlanClass::TimestampJitter);
    }

    #[test]
    fn test_classify_significant_mismatch() {
        assert_eq!(classify_plan(30.0, 30.0, 5, 5, 100), PlanClass::SignificantMismatch);
        assert_eq!(classify_plan(30.0, 30.0, 0, 0, 100), PlanClass::ExactMatch);
        assert_eq!(classify_plan(31.0, 30.0, 1, 3, 1000), PlanClass::TimestampJitter);
    }

    #[test]
    fn test_single_frame_and_empty() {
        let plan = build_frame_plan(&[BASE], 30.0).unwrap();
        assert_eq!(plan.selection, vec![0]);
        assert_eq!(plan.source_fps, 0.0);
        assert_eq!(plan.class, PlanClass::ExactMatch);

        let plan = build_frame_plan(&[], 30.0).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_invalid_fps() {
        assert!(build_frame_plan(&[BASE], 0.0).is_err());
        assert!(build_frame_plan(&[BASE], f64::NAN).is_err());
    }
}
