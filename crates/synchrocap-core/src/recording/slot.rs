//! Per-camera recording state

use crate::container::PixelFormat;
use crate::device::Device;

/// One camera taking part in a session
///
/// Owned by the coordinator while idle or scheduled, moved into the camera's
/// capture worker while recording, and handed back when the worker's stop
/// sequence has run.
pub struct DeviceSlot {
    pub(crate) device: Box<dyn Device>,
    /// Requested trigger rate, overrides the device's `AcquisitionFrameRate`
    pub(crate) requested_rate_hz: Option<f64>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pixel_format: PixelFormat,
    /// Trigger rate in effect for the session
    pub(crate) trigger_rate_hz: f64,
    /// Last measured device minus reference offset
    pub(crate) offset_ns: i64,
    /// Scheduled start in the device's clock domain
    pub(crate) device_target_ns: i64,
    /// Frames captured in the current session
    pub(crate) frames: u64,
}

impl DeviceSlot {
    pub fn new(device: Box<dyn Device>) -> Self {
        Self {
            device,
            requested_rate_hz: None,
            width: 0,
            height: 0,
            pixel_format: PixelFormat::BayerGR8,
            trigger_rate_hz: 0.0,
            offset_ns: 0,
            device_target_ns: 0,
            frames: 0,
        }
    }

    /// Trigger this camera at `rate_hz` instead of its configured frame rate
    pub fn with_trigger_rate(mut self, rate_hz: f64) -> Self {
        self.requested_rate_hz = Some(rate_hz);
        self
    }

    pub fn serial(&self) -> &str {
        self.device.serial()
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn trigger_rate_hz(&self) -> f64 {
        self.trigger_rate_hz
    }

    pub fn offset_ns(&self) -> i64 {
        self.offset_ns
    }

    pub fn device_target_ns(&self) -> i64 {
        self.device_target_ns
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Payload size every frame must have
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Give the device back to the caller
    pub fn into_device(self) -> Box<dyn Device> {
        self.device
    }
}

impl std::fmt::Debug for DeviceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSlot")
            .field("serial", &self.serial())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("trigger_rate_hz", &self.trigger_rate_hz)
            .field("offset_ns", &self.offset_ns)
            .field("frames", &self.frames)
            .finish()
    }
}
