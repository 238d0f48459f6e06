//! Clock synchronization between the host and the cameras
//!
//! - [`clock`]: the host reference clock
//! - [`convergence`]: waiting for every camera to lock onto PTP
//! - [`offset`]: latch-based host/camera offset estimation
//! - [`schedule`]: Action Scheduler trigger times and commits

pub mod clock;
pub mod convergence;
pub mod offset;
pub mod schedule;

pub use clock::{ReferenceClock, SystemClock};
pub use convergence::{wait_for_convergence, ConvergencePolicy, ConvergenceTally};
pub use offset::{sample_offset, OffsetSample, SyncError};
pub use schedule::{
    build_schedule, commit_schedule, interval_us_for_rate, CommitOutcome, DeviceSchedule,
    ScheduleError, ScheduleInput, ScheduledStart,
};
