//! Host/camera clock offset estimation
//!
//! The camera clock is latched between two reads of the reference clock:
//!
//! ```text
//! before ──── latch ──── after
//!              │
//!          device_ns
//! offset = device_ns - (before + after) / 2
//! ```
//!
//! The latch happened somewhere inside the bracket, so the estimate is off
//! by at most half the bracket width.

use super::clock::ReferenceClock;
use crate::device::{props, Device, DeviceError};
use thiserror::Error;

/// Errors from offset sampling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Device {serial} does not support timestamp latching")]
    LatchUnsupported { serial: String },

    #[error("Timestamp latch failed on {serial}: {source}")]
    Latch {
        serial: String,
        #[source]
        source: DeviceError,
    },
}

/// One bracketed latch of a camera clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetSample {
    /// Reference time before the latch command
    pub before_ns: i64,
    /// Latched device time
    pub device_ns: i64,
    /// Reference time after the latch command
    pub after_ns: i64,
}

impl OffsetSample {
    /// Midpoint of the reference bracket
    pub fn reference_mid_ns(&self) -> i64 {
        self.before_ns + (self.after_ns - self.before_ns) / 2
    }

    /// Estimated device clock minus reference clock
    pub fn offset_ns(&self) -> i64 {
        self.device_ns - self.reference_mid_ns()
    }

    /// Upper bound of the estimation error
    pub fn uncertainty_ns(&self) -> i64 {
        (self.after_ns - self.before_ns + 1) / 2
    }
}

/// Latch the device clock between two reference reads
///
/// # Arguments
/// * `device` - camera exposing `TimestampLatch` / `TimestampLatchValue`
/// * `clock` - reference clock of the host
pub fn sample_offset(
    device: &mut dyn Device,
    clock: &dyn ReferenceClock,
) -> Result<OffsetSample, SyncError> {
    let serial = device.serial().to_string();
    let map_err = |source: DeviceError, serial: &str| {
        if source.is_not_present() {
            SyncError::LatchUnsupported {
                serial: serial.to_string(),
            }
        } else {
            SyncError::Latch {
                serial: serial.to_string(),
                source,
            }
        }
    };

    let before_ns = clock.now_ns();
    device
        .execute(props::TIMESTAMP_LATCH)
        .map_err(|e| map_err(e, &serial))?;
    let after_ns = clock.now_ns();

    let device_ns = device
        .get_int(props::TIMESTAMP_LATCH_VALUE)
        .map_err(|e| map_err(e, &serial))?;

    let sample = OffsetSample {
        before_ns,
        device_ns,
        after_ns,
    };
    tracing::debug!(
        serial = %serial,
        offset_ns = sample.offset_ns(),
        bracket_ns = after_ns - before_ns,
        "Offset sampled"
    );
    Ok(sample)
}
