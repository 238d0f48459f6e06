//! Persistent recorder configuration
//!
//! Stores the output location, session defaults, encoder settings and the
//! camera list in a JSON file at `<config_dir>/synchrocap/config.json`.
//! Missing fields take their defaults, so older files keep loading.

use crate::device::sim::{SimConfig, SimDevice};
use crate::recording::{CoordinatorOptions, DeviceSlot, EncoderSettings, SessionPlan, SinkKind};
use crate::sync::{ConvergencePolicy, ReferenceClock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn default_output_root() -> PathBuf {
    dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synchrocap")
}

fn default_start_delay_secs() -> f64 {
    5.0
}

fn default_duration_secs() -> f64 {
    10.0
}

fn default_output_format() -> SinkKind {
    SinkKind::Container
}

fn default_frames_per_file() -> u32 {
    crate::DEFAULT_FRAMES_PER_FILE
}

fn default_trigger_rate_hz() -> f64 {
    crate::DEFAULT_TRIGGER_RATE_HZ
}

fn default_convergence_timeout_secs() -> f64 {
    30.0
}

fn default_poll_interval_secs() -> f64 {
    1.0
}

fn default_queue_buffer_count() -> usize {
    crate::recording::DEFAULT_QUEUE_BUFFERS
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

/// One camera of the rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub serial: String,
    /// Overrides the camera's own frame rate
    #[serde(default)]
    pub trigger_rate_hz: Option<f64>,
    /// Simulated sensor width
    #[serde(default = "default_width")]
    pub width: u32,
    /// Simulated sensor height
    #[serde(default = "default_height")]
    pub height: u32,
    /// Simulated clock offset against the host
    #[serde(default)]
    pub offset_ns: i64,
}

impl DeviceConfig {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            trigger_rate_hz: None,
            width: default_width(),
            height: default_height(),
            offset_ns: 0,
        }
    }
}

/// PTP cameras run on TAI, 37 s ahead of a UTC host clock
const TAI_UTC_OFFSET_NS: i64 = 37_000_000_000;

fn default_devices() -> Vec<DeviceConfig> {
    (0..4)
        .map(|i| DeviceConfig {
            offset_ns: TAI_UTC_OFFSET_NS,
            ..DeviceConfig::new(format!("SIM{:04}", i + 1))
        })
        .collect()
}

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Sessions are created below this directory
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_start_delay_secs")]
    pub start_delay_secs: f64,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,
    /// "raw" (SRAW container) or "mp4" (external encoder)
    #[serde(default = "default_output_format")]
    pub output_format: SinkKind,
    #[serde(default = "default_frames_per_file")]
    pub frames_per_file: u32,
    /// Trigger rate for cameras without their own
    #[serde(default = "default_trigger_rate_hz")]
    pub trigger_rate_hz: f64,
    #[serde(default = "default_convergence_timeout_secs")]
    pub convergence_timeout_secs: f64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_queue_buffer_count")]
    pub queue_buffer_count: usize,
    #[serde(default)]
    pub encoder: EncoderSettings,
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceConfig>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            start_delay_secs: default_start_delay_secs(),
            duration_secs: default_duration_secs(),
            output_format: default_output_format(),
            frames_per_file: default_frames_per_file(),
            trigger_rate_hz: default_trigger_rate_hz(),
            convergence_timeout_secs: default_convergence_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            queue_buffer_count: default_queue_buffer_count(),
            encoder: EncoderSettings::default(),
            devices: default_devices(),
        }
    }
}

/// Negative or non-finite seconds become zero
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl RecorderConfig {
    /// Config file path: `<config_dir>/synchrocap/config.json`
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synchrocap")
            .join("config.json")
    }

    /// Load from the default path
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    pub fn session_plan(&self) -> SessionPlan {
        SessionPlan {
            start_delay: secs(self.start_delay_secs),
            duration: secs(self.duration_secs),
            sink: self.output_format,
            frames_per_file: self.frames_per_file,
            default_trigger_rate_hz: self.trigger_rate_hz,
        }
    }

    pub fn convergence_policy(&self) -> ConvergencePolicy {
        ConvergencePolicy {
            timeout: secs(self.convergence_timeout_secs),
            poll_interval: secs(self.poll_interval_secs),
        }
    }

    /// One simulated camera per configured device
    ///
    /// A camera without its own trigger rate runs at the session default.
    pub fn simulated_slots(&self, clock: &Arc<dyn ReferenceClock>) -> Vec<DeviceSlot> {
        self.devices
            .iter()
            .map(|device| {
                let rate = device.trigger_rate_hz.unwrap_or(self.trigger_rate_hz);
                let config = SimConfig::new(device.serial.clone())
                    .resolution(device.width, device.height)
                    .offset_ns(device.offset_ns)
                    .frame_rate(rate);
                let (camera, _) = SimDevice::new(config, clock.clone());
                let slot = DeviceSlot::new(Box::new(camera));
                match device.trigger_rate_hz {
                    Some(rate) => slot.with_trigger_rate(rate),
                    None => slot,
                }
            })
            .collect()
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            output_root: self.output_root.clone(),
            queue_buffer_count: self.queue_buffer_count,
            convergence: self.convergence_policy(),
            encoder: self.encoder.clone(),
        }
    }
}
