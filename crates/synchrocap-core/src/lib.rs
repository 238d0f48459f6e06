//! SynchroCap Core - Synchronized multi-camera recording
//!
//! This library coordinates several independently clocked cameras so that they
//! start exposing at the same PTP instant and record for the same duration.
//! Each camera's stream is written either to an external encoder process or to
//! the SRAW raw container, with a per-camera CSV log of device timestamps.
//!
//! The offline [`toolkit`] validates, checks and re-encodes stored sessions.

pub mod config;
pub mod container;
pub mod device;
pub mod framelog;
pub mod recording;
pub mod sync;
pub mod toolkit;

#[cfg(test)]
mod test_support;

pub use config::RecorderConfig;
pub use container::{ContainerWriter, FileHeader, FrameHeader, FrameLocations, PixelFormat};
pub use device::{Device, DeviceError, Frame, PropertyMap};
pub use recording::{Coordinator, DeviceSlot, RecordingState, SessionPlan, SessionReport, SinkKind};
pub use sync::{ReferenceClock, SystemClock};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default number of frames per SRAW file before splitting
pub const DEFAULT_FRAMES_PER_FILE: u32 = 1000;

/// Default Action Scheduler trigger rate in Hz
pub const DEFAULT_TRIGGER_RATE_HZ: f64 = 50.0;
