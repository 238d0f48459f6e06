//! Offline tools for recorded sessions
//!
//! Everything here works on files only and never touches a camera:
//!
//! - [`validate_session`] checks container structure against the frame logs
//! - [`sync_check`] measures cross-camera timestamp spread per frame
//! - [`continuity`] flags abnormal frame intervals in the frame logs
//! - [`build_frame_plan`] and [`plan_encode`] re-time container frames for a
//!   constant-rate encode
//! - [`dump_container`] and [`preview_frame`] inspect single files

mod continuity;
mod dump;
mod encode;
mod plan;
mod preview;
mod sync_check;
mod validate;

pub use continuity::{
    check_continuity, continuity, continuity_for_log, ContinuityIssue, ContinuityReport, DEFAULT_TOLERANCE_MS,
};
pub use dump::{dump_container, ContainerDump};
pub use encode::{encode_device, plan_encode, EncodeJob, FrameLocation};
pub use plan::{build_frame_plan, classify_plan, FramePlan, PlanClass};
pub use preview::{debayer_grbg8, preview_frame, Preview};
pub use sync_check::{sync_check, sync_stats, SyncReport, SyncStats, SyncViolation, MAX_VIOLATIONS_SHOWN};
pub use validate::{validate_device, validate_session, CheckResult, CheckStatus, DeviceValidation, SessionValidation};

use crate::container::ContainerError;
use crate::framelog::FrameLogError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the offline tools
#[derive(Error, Debug)]
pub enum ToolkitError {
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("No raw or csv files found in {}", .0.display())]
    NoSessionFiles(PathBuf),

    #[error("No raw files found for serial {serial}")]
    UnknownSerial { serial: String },

    #[error("No frames found in raw files")]
    NoFrames,

    #[error("Need at least 2 cameras with frame logs, found {found}")]
    NotEnoughLogs { found: usize },

    #[error("No common frames across cameras")]
    NoCommonFrames,

    #[error("Unsupported pixel format {0}, only BayerGR8 is supported")]
    UnsupportedPixelFormat(String),

    #[error("Output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("Frame {requested} out of range (file has {available} frames)")]
    FrameOutOfRange { requested: usize, available: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to start encoder: {0}")]
    EncoderSpawn(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    FrameLog(#[from] FrameLogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolkitError {
    /// Bad input rather than a failed check or encode
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::EncodingFailed(_))
    }
}
