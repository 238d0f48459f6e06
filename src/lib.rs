//! SynchroCap - synchronized multi-camera recording
//!
//! This library re-exports the recording coordinator, the SRAW container,
//! clock synchronization and the offline toolkit from `synchrocap-core`.
//! The `synchrocap` binary records sessions, `rawtool` inspects them.

pub use synchrocap_core::config;
pub use synchrocap_core::container;
pub use synchrocap_core::device;
pub use synchrocap_core::framelog;
pub use synchrocap_core::recording;
pub use synchrocap_core::sync;
pub use synchrocap_core::toolkit;

pub use synchrocap_core::{
    Coordinator, ContainerWriter, Device, DeviceError, DeviceSlot, FileHeader, Frame, FrameHeader,
    FrameLocations, PixelFormat, PropertyMap, RecorderConfig, RecordingState, ReferenceClock,
    SessionPlan, SessionReport, SinkKind, SystemClock,
};
pub use synchrocap_core::{BUILD_DATE, DEFAULT_FRAMES_PER_FILE, DEFAULT_TRIGGER_RATE_HZ, VERSION};
