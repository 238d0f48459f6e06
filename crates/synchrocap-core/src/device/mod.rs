//! Camera device interface
//!
//! The recording core only talks to cameras through the [`PropertyMap`] and
//! [`Device`] traits. A vendor SDK binding implements them outside this crate;
//! [`sim::SimDevice`] implements them in-process for tests and dry runs.
//!
//! Properties are addressed by their GenICam names (see [`props`]).

pub mod sim;

use thiserror::Error;

/// GenICam property names used by the recorder
pub mod props {
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    pub const ACQUISITION_FRAME_RATE: &str = "AcquisitionFrameRate";

    /// PTP port state, e.g. "Master", "Slave", "Listening"
    pub const PTP_STATUS: &str = "PtpStatus";
    /// Older GigE Vision name for [`PTP_STATUS`]
    pub const GEV_IEEE1588_STATUS: &str = "GevIEEE1588Status";

    pub const TIMESTAMP_LATCH: &str = "TimestampLatch";
    pub const TIMESTAMP_LATCH_VALUE: &str = "TimestampLatchValue";

    pub const TRIGGER_SELECTOR: &str = "TriggerSelector";
    pub const TRIGGER_SOURCE: &str = "TriggerSource";
    pub const TRIGGER_MODE: &str = "TriggerMode";

    pub const ACTION_SCHEDULER_CANCEL: &str = "ActionSchedulerCancel";
    pub const ACTION_SCHEDULER_TIME: &str = "ActionSchedulerTime";
    pub const ACTION_SCHEDULER_INTERVAL: &str = "ActionSchedulerInterval";
    pub const ACTION_SCHEDULER_COMMIT: &str = "ActionSchedulerCommit";
}

/// Errors reported by a camera device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Property not present: {name}")]
    NotPresent { name: String },

    #[error("Property {name} rejected: {reason}")]
    Rejected { name: String, reason: String },

    #[error("Frame queue fault: {0}")]
    QueueFault(String),

    #[error("Invalid device state: {0}")]
    InvalidState(&'static str),
}

impl DeviceError {
    pub fn not_present(name: &str) -> Self {
        Self::NotPresent {
            name: name.to_string(),
        }
    }

    pub fn rejected(name: &str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the device simply does not implement the property
    pub fn is_not_present(&self) -> bool {
        matches!(self, Self::NotPresent { .. })
    }
}

/// A captured frame popped from the device output queue
#[derive(Debug, Clone)]
pub struct Frame {
    /// Device-side frame counter
    pub frame_number: u64,
    /// Device clock timestamp in nanoseconds
    pub timestamp_ns: i64,
    /// Raw pixel data
    pub payload: Vec<u8>,
}

/// Typed access to a device's named properties
pub trait PropertyMap {
    fn get_int(&self, name: &str) -> Result<i64, DeviceError>;
    fn get_float(&self, name: &str) -> Result<f64, DeviceError>;
    fn get_string(&self, name: &str) -> Result<String, DeviceError>;

    fn set_int(&mut self, name: &str, value: i64) -> Result<(), DeviceError>;
    fn set_float(&mut self, name: &str, value: f64) -> Result<(), DeviceError>;
    fn set_string(&mut self, name: &str, value: &str) -> Result<(), DeviceError>;
    fn set_bool(&mut self, name: &str, value: bool) -> Result<(), DeviceError>;

    /// Run a command property (e.g. `TimestampLatch`)
    fn execute(&mut self, name: &str) -> Result<(), DeviceError>;

    /// Read the first present string property out of `names`
    fn get_string_any(&self, names: &[&str]) -> Result<String, DeviceError> {
        let mut last = DeviceError::NotPresent {
            name: names.join("|"),
        };
        for name in names {
            match self.get_string(name) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_not_present() => last = e,
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }
}

/// A camera with a pull-based frame queue
///
/// The lifecycle used by the recorder is:
/// `stream_setup` (queue armed, acquisition deferred) → `acquisition_start` →
/// repeated `try_pop_frame` → `acquisition_stop` → `stream_stop`.
pub trait Device: PropertyMap + Send {
    /// Device serial number, used to name output files
    fn serial(&self) -> &str;

    /// Allocate `buffer_count` queue buffers without starting acquisition
    fn stream_setup(&mut self, buffer_count: usize) -> Result<(), DeviceError>;

    fn acquisition_start(&mut self) -> Result<(), DeviceError>;

    fn acquisition_stop(&mut self) -> Result<(), DeviceError>;

    fn stream_stop(&mut self) -> Result<(), DeviceError>;

    /// Whether a stream (preview or recording) is currently set up
    fn is_streaming(&self) -> bool;

    /// Pop the next filled buffer, `Ok(None)` when the queue is empty
    fn try_pop_frame(&mut self) -> Result<Option<Frame>, DeviceError>;
}

/// Read the PTP port state using either property name
pub fn ptp_status(device: &dyn Device) -> Option<String> {
    device
        .get_string_any(&[props::PTP_STATUS, props::GEV_IEEE1588_STATUS])
        .ok()
}
