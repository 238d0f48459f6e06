//! Session plan and output directory

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where recorded frames go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkKind {
    /// Piped into an external encoder, `cam{serial}.mp4`
    #[serde(rename = "mp4", alias = "encoded")]
    Encoded,
    /// Stored in SRAW container files
    #[serde(rename = "raw", alias = "container")]
    Container,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Encoded => "mp4",
            Self::Container => "raw",
        })
    }
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" | "encoded" => Ok(Self::Encoded),
            "raw" | "container" => Ok(Self::Container),
            other => Err(format!("unknown output format '{other}' (expected raw or mp4)")),
        }
    }
}

/// What one recording session should do
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    /// Time between scheduling and the first trigger
    pub start_delay: Duration,
    /// Recording length, measured from the scheduled start
    pub duration: Duration,
    pub sink: SinkKind,
    /// Container split threshold
    pub frames_per_file: u32,
    /// Trigger rate for cameras that do not set their own
    pub default_trigger_rate_hz: f64,
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(5),
            duration: Duration::from_secs(10),
            sink: SinkKind::Container,
            frames_per_file: crate::DEFAULT_FRAMES_PER_FILE,
            default_trigger_rate_hz: crate::DEFAULT_TRIGGER_RATE_HZ,
        }
    }
}

impl SessionPlan {
    /// Check the plan before any device is touched
    pub fn validate(&self) -> Result<(), String> {
        if self.duration.is_zero() {
            return Err("duration must be positive".to_string());
        }
        if self.sink == SinkKind::Container && self.frames_per_file == 0 {
            return Err("frames per file must be at least 1".to_string());
        }
        if !self.default_trigger_rate_hz.is_finite() || self.default_trigger_rate_hz <= 0.0 {
            return Err(format!(
                "invalid trigger rate {} Hz",
                self.default_trigger_rate_hz
            ));
        }
        Ok(())
    }

    /// `floor(duration_s * rate)`
    pub fn expected_frames(&self, trigger_rate_hz: f64) -> u64 {
        (self.duration.as_secs_f64() * trigger_rate_hz).floor() as u64
    }
}

/// A prepared session: plan plus its output directory
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub plan: SessionPlan,
    pub output_dir: PathBuf,
    /// Wall-clock time the session was prepared
    pub created_at: DateTime<Local>,
}

impl RecordingSession {
    /// Create a fresh output directory under `output_root`
    pub fn create(plan: SessionPlan, output_root: &Path) -> io::Result<Self> {
        let created_at = Local::now();
        let output_dir = create_session_dir(output_root, created_at)?;
        tracing::info!(dir = %output_dir.display(), sink = %plan.sink, "Session directory created");
        Ok(Self {
            plan,
            output_dir,
            created_at,
        })
    }
}

/// Create `{root}/{%Y%m%d-%H%M%S}`, adding `-N` when the name is taken
pub fn create_session_dir(root: &Path, now: DateTime<Local>) -> io::Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    let base = now.format("%Y%m%d-%H%M%S").to_string();

    let mut candidate = root.join(&base);
    let mut suffix = 1;
    loop {
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && suffix < 1000 => {
                candidate = root.join(format!("{base}-{suffix}"));
                suffix += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
