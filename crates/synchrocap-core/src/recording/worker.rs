//! Per-camera capture thread
//!
//! Each worker owns its camera's slot, sink and frame log for the whole
//! recording. It pulls frames until the session deadline, which is counted
//! from the scheduled start on the reference clock, then runs the stop
//! sequence and hands everything back to the coordinator.

use super::sink::FrameSink;
use super::slot::DeviceSlot;
use crate::device::DeviceError;
use crate::framelog::FrameLog;
use crate::sync::ReferenceClock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Sleep when the camera queue is empty
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Why a camera stopped recording before its deadline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameWriteFailure {
    #[error("Acquisition start failed: {0}")]
    AcquisitionStart(DeviceError),

    #[error("Frame queue failed: {0}")]
    Device(DeviceError),

    #[error("Encoder process exited")]
    EncoderExited,

    #[error("Sink write failed: {0}")]
    Sink(String),

    #[error("Capture thread panicked: {0}")]
    Panicked(String),

    #[error("Capture thread could not be started: {0}")]
    ThreadSpawn(String),
}

/// How a camera's recording ended
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// Ran until the deadline
    Completed,
    Aborted(FrameWriteFailure),
}

/// Per-camera result of a session
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub serial: String,
    pub frames: u64,
    pub expected_frames: u64,
    pub files: Vec<PathBuf>,
    pub outcome: WorkerOutcome,
    /// Reference time at which capture stopped
    pub stopped_at_ns: i64,
    /// Errors from the stop sequence, logged and otherwise ignored
    pub teardown_failures: Vec<String>,
}

impl DeviceReport {
    pub fn completed(&self) -> bool {
        self.outcome == WorkerOutcome::Completed
    }
}

/// Everything a worker thread takes ownership of
pub(crate) struct CaptureJob {
    pub slot: DeviceSlot,
    pub sink: Box<dyn FrameSink>,
    pub frame_log: Option<FrameLog>,
    pub clock: Arc<dyn ReferenceClock>,
    pub deadline_ns: i64,
    pub expected_frames: u64,
}

/// What a finished worker hands back
pub(crate) struct CaptureReturn {
    pub slot: DeviceSlot,
    pub sink: Box<dyn FrameSink>,
    pub report: DeviceReport,
}

impl CaptureJob {
    /// Run the capture loop and the stop sequence on the current thread
    pub fn run(mut self) -> CaptureReturn {
        let serial = self.slot.serial().to_string();
        tracing::info!(
            serial = %serial,
            deadline_ns = self.deadline_ns,
            expected = self.expected_frames,
            "Capture worker running"
        );

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.capture()));
        let outcome = match result {
            Ok(Ok(())) => WorkerOutcome::Completed,
            Ok(Err(failure)) => {
                tracing::error!(serial = %serial, error = %failure, frames = self.slot.frames, "Capture aborted");
                WorkerOutcome::Aborted(failure)
            }
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(serial = %serial, panic = %msg, "Capture worker PANICKED");
                WorkerOutcome::Aborted(FrameWriteFailure::Panicked(msg))
            }
        };
        let stopped_at_ns = self.clock.now_ns();

        let teardown_failures = self.stop_sequence();

        let report = DeviceReport {
            serial,
            frames: self.slot.frames,
            expected_frames: self.expected_frames,
            files: self.sink.files(),
            outcome,
            stopped_at_ns,
            teardown_failures,
        };
        tracing::info!(
            serial = %report.serial,
            frames = report.frames,
            expected = report.expected_frames,
            completed = report.completed(),
            "Capture worker finished"
        );

        CaptureReturn {
            slot: self.slot,
            sink: self.sink,
            report,
        }
    }

    fn capture(&mut self) -> Result<(), FrameWriteFailure> {
        self.slot
            .device
            .acquisition_start()
            .map_err(FrameWriteFailure::AcquisitionStart)?;

        let serial = self.slot.serial().to_string();
        let mut log_warned = false;

        while self.clock.now_ns() < self.deadline_ns {
            if !self.sink.is_alive() {
                return Err(FrameWriteFailure::EncoderExited);
            }

            let frame = match self.slot.device.try_pop_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    std::thread::sleep(IDLE_POLL);
                    continue;
                }
                Err(e) => return Err(FrameWriteFailure::Device(e)),
            };

            if let Some(log) = self.frame_log.as_mut() {
                if let Err(e) = log.append(frame.frame_number, frame.timestamp_ns) {
                    if !log_warned {
                        tracing::warn!(serial = %serial, error = %e, "Frame log write failed");
                        log_warned = true;
                    }
                }
            }

            self.sink
                .write_frame(&frame)
                .map_err(|e| FrameWriteFailure::Sink(e.to_string()))?;
            self.slot.frames += 1;
        }
        Ok(())
    }

    /// Sink, then acquisition, then stream
    fn stop_sequence(&mut self) -> Vec<String> {
        let serial = self.slot.serial().to_string();
        let mut failures = Vec::new();

        if let Err(e) = self.sink.finish() {
            failures.push(format!("sink finish: {e}"));
        }
        if let Some(mut log) = self.frame_log.take() {
            if let Err(e) = log.finish() {
                failures.push(format!("frame log close: {e}"));
            }
        }
        if let Err(e) = self.slot.device.acquisition_stop() {
            failures.push(format!("acquisition stop: {e}"));
        }
        if let Err(e) = self.slot.device.stream_stop() {
            failures.push(format!("stream stop: {e}"));
        }

        for failure in &failures {
            tracing::warn!(serial = %serial, failure = %failure, "Teardown step failed");
        }
        failures
    }
}
