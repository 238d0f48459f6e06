//! In-process simulated camera
//!
//! Behaves like a PTP-locked GigE camera driven by the Action Scheduler:
//!
//! - the device clock runs at `reference + offset_ns`
//! - `TimestampLatch` latches the device clock into `TimestampLatchValue`
//! - `ActionSchedulerCommit` arms a trigger at `ActionSchedulerTime` that
//!   repeats every `ActionSchedulerInterval` microseconds
//! - frames are produced lazily when the queue is polled, one per trigger
//!   that has elapsed since acquisition started
//!
//! A commit whose target time already passed fires right away, mirroring
//! what the hardware does. A commit without an interval fires only once.
//!
//! Faults (no convergence, latch missing, commit rejected, queue fault,
//! stream stop refused, wrong payload size) are configured on
//! [`SimConfig`]; the returned [`SimHandle`] inspects device state after
//! the device has been moved into a recording thread.

use super::{props, Device, DeviceError, Frame, PropertyMap};
use crate::sync::ReferenceClock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Static behaviour of a simulated camera
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub serial: String,
    pub width: u32,
    pub height: u32,
    /// Reported `AcquisitionFrameRate`
    pub frame_rate: f64,
    /// Device clock minus reference clock
    pub offset_ns: i64,
    /// Number of status polls before reporting "Slave" (None = never)
    pub converge_after_polls: Option<u32>,
    pub latch_supported: bool,
    pub reject_commit: bool,
    pub reject_stream_setup: bool,
    /// `stream_stop` fails and leaves the stream armed
    pub fail_stream_stop: bool,
    /// Raise a queue fault after this many delivered frames
    pub fail_after_frames: Option<u64>,
    /// Deliver payloads of this size instead of width*height
    pub payload_len: Option<usize>,
}

impl SimConfig {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            width: 64,
            height: 48,
            frame_rate: 50.0,
            offset_ns: 0,
            converge_after_polls: Some(0),
            latch_supported: true,
            reject_commit: false,
            reject_stream_setup: false,
            fail_stream_stop: false,
            fail_after_frames: None,
            payload_len: None,
        }
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn offset_ns(mut self, offset_ns: i64) -> Self {
        self.offset_ns = offset_ns;
        self
    }

    pub fn frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn converge_after_polls(mut self, polls: Option<u32>) -> Self {
        self.converge_after_polls = polls;
        self
    }

    pub fn without_latch(mut self) -> Self {
        self.latch_supported = false;
        self
    }

    pub fn reject_commit(mut self) -> Self {
        self.reject_commit = true;
        self
    }

    pub fn reject_stream_setup(mut self) -> Self {
        self.reject_stream_setup = true;
        self
    }

    pub fn fail_stop(mut self) -> Self {
        self.fail_stream_stop = true;
        self
    }

    pub fn fail_after_frames(mut self, frames: u64) -> Self {
        self.fail_after_frames = Some(frames);
        self
    }

    pub fn payload_len(mut self, len: usize) -> Self {
        self.payload_len = Some(len);
        self
    }
}

/// Trigger schedule accepted by a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedSchedule {
    /// Device time of the first trigger
    pub first_fire_ns: i64,
    /// Trigger period, None when no interval was written
    pub interval_ns: Option<i64>,
    /// Device time at which the commit happened
    pub committed_at_ns: i64,
}

/// Mutable simulator state, shared with [`SimHandle`]
#[derive(Debug, Default)]
pub struct SimState {
    /// Every property write in order, as (name, value)
    pub writes: Vec<(String, String)>,
    pub status_polls: u32,
    pub latched_ns: Option<i64>,
    pub pending_time_ns: Option<i64>,
    pub pending_interval_us: Option<i64>,
    pub committed: Option<CommittedSchedule>,
    pub strings: HashMap<String, String>,
    pub armed_buffers: Option<usize>,
    pub streaming: bool,
    pub acquiring: bool,
    pub acquisition_starts: u32,
    pub acquisition_stops: u32,
    pub stream_stops: u32,
    pub next_trigger: u64,
    pub frames_delivered: u64,
}

/// Observer for a [`SimDevice`] that stays valid after the device is moved
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn with<T>(&self, f: impl FnOnce(&SimState) -> T) -> T {
        match self.state.lock() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.with(|s| s.writes.clone())
    }

    pub fn committed(&self) -> Option<CommittedSchedule> {
        self.with(|s| s.committed)
    }

    pub fn status_polls(&self) -> u32 {
        self.with(|s| s.status_polls)
    }

    pub fn acquisition_starts(&self) -> u32 {
        self.with(|s| s.acquisition_starts)
    }

    pub fn acquisition_stops(&self) -> u32 {
        self.with(|s| s.acquisition_stops)
    }

    pub fn stream_stops(&self) -> u32 {
        self.with(|s| s.stream_stops)
    }

    pub fn armed_buffers(&self) -> Option<usize> {
        self.with(|s| s.armed_buffers)
    }

    pub fn is_streaming(&self) -> bool {
        self.with(|s| s.streaming)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.with(|s| s.frames_delivered)
    }
}

/// Simulated PTP camera
pub struct SimDevice {
    config: SimConfig,
    clock: Arc<dyn ReferenceClock>,
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    /// Create a device and a handle observing its state
    pub fn new(config: SimConfig, clock: Arc<dyn ReferenceClock>) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let handle = SimHandle {
            state: Arc::clone(&state),
        };
        (
            Self {
                config,
                clock,
                state,
            },
            handle,
        )
    }

    /// Current device clock in nanoseconds
    pub fn device_now_ns(&self) -> i64 {
        self.clock.now_ns() + self.config.offset_ns
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, SimState>, DeviceError> {
        self.state
            .lock()
            .map_err(|_| DeviceError::InvalidState("simulator state poisoned"))
    }

    fn record_write(state: &mut SimState, name: &str, value: String) {
        state.writes.push((name.to_string(), value));
    }

    fn commit(&self, state: &mut SimState) -> Result<(), DeviceError> {
        if self.config.reject_commit {
            return Err(DeviceError::rejected(
                props::ACTION_SCHEDULER_COMMIT,
                "scheduler busy",
            ));
        }
        let time_ns = state.pending_time_ns.ok_or_else(|| {
            DeviceError::rejected(props::ACTION_SCHEDULER_COMMIT, "no scheduler time set")
        })?;
        let now = self.device_now_ns();
        state.committed = Some(CommittedSchedule {
            first_fire_ns: time_ns.max(now),
            interval_ns: state
                .pending_interval_us
                .filter(|us| *us > 0)
                .map(|us| us * 1_000),
            committed_at_ns: now,
        });
        Ok(())
    }

    fn run_command(&mut self, name: &str) -> Result<(), DeviceError> {
        let mut state = self.state()?;
        Self::record_write(&mut state, name, "execute".to_string());
        match name {
            props::TIMESTAMP_LATCH if self.config.latch_supported => {
                state.latched_ns = Some(self.device_now_ns());
                Ok(())
            }
            props::ACTION_SCHEDULER_CANCEL => {
                state.committed = None;
                state.pending_time_ns = None;
                state.pending_interval_us = None;
                Ok(())
            }
            props::ACTION_SCHEDULER_COMMIT => self.commit(&mut state),
            _ => Err(DeviceError::not_present(name)),
        }
    }

    fn payload(&self, frame_number: u64) -> Vec<u8> {
        let len = self
            .config
            .payload_len
            .unwrap_or(self.config.width as usize * self.config.height as usize);
        let base = (frame_number % 251) as u8;
        (0..len).map(|i| base.wrapping_add((i % 7) as u8)).collect()
    }
}

impl PropertyMap for SimDevice {
    fn get_int(&self, name: &str) -> Result<i64, DeviceError> {
        match name {
            props::WIDTH => Ok(i64::from(self.config.width)),
            props::HEIGHT => Ok(i64::from(self.config.height)),
            props::TIMESTAMP_LATCH_VALUE if self.config.latch_supported => self
                .state()?
                .latched_ns
                .ok_or_else(|| DeviceError::rejected(name, "latch not executed")),
            _ => Err(DeviceError::not_present(name)),
        }
    }

    fn get_float(&self, name: &str) -> Result<f64, DeviceError> {
        match name {
            props::ACQUISITION_FRAME_RATE => Ok(self.config.frame_rate),
            _ => Err(DeviceError::not_present(name)),
        }
    }

    fn get_string(&self, name: &str) -> Result<String, DeviceError> {
        match name {
            props::PTP_STATUS => {
                let mut state = self.state()?;
                let polls = state.status_polls;
                state.status_polls += 1;
                let converged = self
                    .config
                    .converge_after_polls
                    .map(|after| polls >= after)
                    .unwrap_or(false);
                Ok(if converged { "Slave" } else { "Listening" }.to_string())
            }
            props::PIXEL_FORMAT => Ok("BayerGR8".to_string()),
            props::TRIGGER_SELECTOR | props::TRIGGER_SOURCE | props::TRIGGER_MODE => self
                .state()?
                .strings
                .get(name)
                .cloned()
                .ok_or_else(|| DeviceError::rejected(name, "not set")),
            _ => Err(DeviceError::not_present(name)),
        }
    }

    fn set_int(&mut self, name: &str, value: i64) -> Result<(), DeviceError> {
        let mut state = self.state()?;
        Self::record_write(&mut state, name, value.to_string());
        match name {
            props::ACTION_SCHEDULER_TIME => {
                state.pending_time_ns = Some(value);
                Ok(())
            }
            props::ACTION_SCHEDULER_INTERVAL => {
                state.pending_interval_us = Some(value);
                Ok(())
            }
            _ => Err(DeviceError::not_present(name)),
        }
    }

    fn set_float(&mut self, name: &str, value: f64) -> Result<(), DeviceError> {
        let mut state = self.state()?;
        Self::record_write(&mut state, name, value.to_string());
        Err(DeviceError::not_present(name))
    }

    fn set_string(&mut self, name: &str, value: &str) -> Result<(), DeviceError> {
        let mut state = self.state()?;
        Self::record_write(&mut state, name, value.to_string());
        match name {
            props::TRIGGER_SELECTOR | props::TRIGGER_SOURCE | props::TRIGGER_MODE => {
                state.strings.insert(name.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(DeviceError::not_present(name)),
        }
    }

    fn set_bool(&mut self, name: &str, value: bool) -> Result<(), DeviceError> {
        if value {
            return self.run_command(name);
        }
        let mut state = self.state()?;
        Self::record_write(&mut state, name, "false".to_string());
        Ok(())
    }

    fn execute(&mut self, name: &str) -> Result<(), DeviceError> {
        self.run_command(name)
    }
}

impl Device for SimDevice {
    fn serial(&self) -> &str {
        &self.config.serial
    }

    fn stream_setup(&mut self, buffer_count: usize) -> Result<(), DeviceError> {
        if self.config.reject_stream_setup {
            return Err(DeviceError::InvalidState("stream setup refused"));
        }
        let mut state = self.state()?;
        state.armed_buffers = Some(buffer_count);
        state.streaming = true;
        Ok(())
    }

    fn acquisition_start(&mut self) -> Result<(), DeviceError> {
        let now = self.device_now_ns();
        let mut state = self.state()?;
        if !state.streaming {
            return Err(DeviceError::InvalidState("stream not set up"));
        }
        state.acquiring = true;
        state.acquisition_starts += 1;
        // Triggers that fired before acquisition started are lost
        state.next_trigger = match state.committed {
            Some(CommittedSchedule {
                first_fire_ns,
                interval_ns: Some(interval),
                ..
            }) if now > first_fire_ns => ((now - first_fire_ns) + interval - 1) as u64 / interval as u64,
            Some(CommittedSchedule {
                first_fire_ns,
                interval_ns: None,
                ..
            }) if now > first_fire_ns => 1,
            _ => 0,
        };
        Ok(())
    }

    fn acquisition_stop(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state()?;
        state.acquiring = false;
        state.acquisition_stops += 1;
        Ok(())
    }

    fn stream_stop(&mut self) -> Result<(), DeviceError> {
        if self.config.fail_stream_stop {
            return Err(DeviceError::InvalidState("stream stop refused"));
        }
        let mut state = self.state()?;
        state.streaming = false;
        state.armed_buffers = None;
        state.stream_stops += 1;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.state().map(|s| s.streaming).unwrap_or(false)
    }

    fn try_pop_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        let now = self.device_now_ns();
        let mut state = self.state()?;
        if !state.acquiring {
            return Ok(None);
        }
        if let Some(limit) = self.config.fail_after_frames {
            if state.frames_delivered >= limit {
                return Err(DeviceError::QueueFault("buffer incomplete".to_string()));
            }
        }
        let Some(schedule) = state.committed else {
            return Ok(None);
        };

        let k = state.next_trigger;
        let fire_ns = match schedule.interval_ns {
            Some(interval) => schedule.first_fire_ns + k as i64 * interval,
            None if k == 0 => schedule.first_fire_ns,
            None => return Ok(None),
        };
        if fire_ns > now {
            return Ok(None);
        }

        state.next_trigger += 1;
        state.frames_delivered += 1;
        drop(state);

        Ok(Some(Frame {
            frame_number: k,
            timestamp_ns: fire_ns,
            payload: self.payload(k),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that only moves when told to
    struct StepClock(AtomicI64);

    impl ReferenceClock for StepClock {
        fn now_ns(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn step_clock(start: i64) -> Arc<StepClock> {
        Arc::new(StepClock(AtomicI64::new(start)))
    }

    #[test]
    fn test_latch_reads_offset_clock() {
        let clock = step_clock(1_000_000);
        let (mut dev, _) = SimDevice::new(SimConfig::new("A").offset_ns(500), clock.clone());
        dev.execute(props::TIMESTAMP_LATCH).unwrap();
        assert_eq!(dev.get_int(props::TIMESTAMP_LATCH_VALUE).unwrap(), 1_000_500);
    }

    #[test]
    fn test_latch_unsupported() {
        let (mut dev, _) = SimDevice::new(SimConfig::new("A").without_latch(), step_clock(0));
        assert!(dev.execute(props::TIMESTAMP_LATCH).unwrap_err().is_not_present());
        assert!(dev
            .get_int(props::TIMESTAMP_LATCH_VALUE)
            .unwrap_err()
            .is_not_present());
    }

    #[test]
    fn test_convergence_after_polls() {
        let (dev, handle) = SimDevice::new(
            SimConfig::new("A").converge_after_polls(Some(2)),
            step_clock(0),
        );
        assert_eq!(dev.get_string(props::PTP_STATUS).unwrap(), "Listening");
        assert_eq!(dev.get_string(props::PTP_STATUS).unwrap(), "Listening");
        assert_eq!(dev.get_string(props::PTP_STATUS).unwrap(), "Slave");
        assert_eq!(handle.status_polls(), 3);
    }

    #[test]
    fn test_scheduled_triggers_fire_on_interval() {
        let clock = step_clock(0);
        let (mut dev, handle) = SimDevice::new(SimConfig::new("A"), clock.clone());
        dev.set_int(props::ACTION_SCHEDULER_TIME, 1_000_000).unwrap();
        dev.set_int(props::ACTION_SCHEDULER_INTERVAL, 20_000).unwrap();
        dev.execute(props::ACTION_SCHEDULER_COMMIT).unwrap();
        dev.stream_setup(8).unwrap();
        dev.acquisition_start().unwrap();

        assert!(dev.try_pop_frame().unwrap().is_none(), "before target");

        clock.0.store(41_000_000, Ordering::SeqCst);
        let mut stamps = Vec::new();
        while let Some(frame) = dev.try_pop_frame().unwrap() {
            assert_eq!(frame.payload.len(), 64 * 48);
            stamps.push(frame.timestamp_ns);
        }
        assert_eq!(stamps, vec![1_000_000, 21_000_000, 41_000_000]);
        assert_eq!(handle.frames_delivered(), 3);
    }

    #[test]
    fn test_commit_without_interval_fires_once() {
        let clock = step_clock(0);
        let (mut dev, _) = SimDevice::new(SimConfig::new("A"), clock.clone());
        dev.set_int(props::ACTION_SCHEDULER_TIME, 10).unwrap();
        dev.execute(props::ACTION_SCHEDULER_COMMIT).unwrap();
        dev.stream_setup(8).unwrap();
        dev.acquisition_start().unwrap();
        clock.0.store(1_000_000_000, Ordering::SeqCst);
        assert!(dev.try_pop_frame().unwrap().is_some());
        assert!(dev.try_pop_frame().unwrap().is_none());
    }

    #[test]
    fn test_elapsed_target_fires_at_commit_time() {
        let clock = step_clock(5_000);
        let (mut dev, handle) = SimDevice::new(SimConfig::new("A"), clock);
        dev.set_int(props::ACTION_SCHEDULER_TIME, 1_000).unwrap();
        dev.set_int(props::ACTION_SCHEDULER_INTERVAL, 1).unwrap();
        dev.execute(props::ACTION_SCHEDULER_COMMIT).unwrap();
        let committed = handle.committed().unwrap();
        assert_eq!(committed.first_fire_ns, 5_000);
        assert_eq!(committed.committed_at_ns, 5_000);
    }

    #[test]
    fn test_queue_fault_after_limit() {
        let clock = step_clock(0);
        let (mut dev, _) = SimDevice::new(SimConfig::new("A").fail_after_frames(1), clock.clone());
        dev.set_int(props::ACTION_SCHEDULER_TIME, 0).unwrap();
        dev.set_int(props::ACTION_SCHEDULER_INTERVAL, 1_000).unwrap();
        dev.execute(props::ACTION_SCHEDULER_COMMIT).unwrap();
        dev.stream_setup(1).unwrap();
        dev.acquisition_start().unwrap();
        clock.0.store(10_000_000, Ordering::SeqCst);
        assert!(dev.try_pop_frame().unwrap().is_some());
        assert!(matches!(
            dev.try_pop_frame(),
            Err(DeviceError::QueueFault(_))
        ));
    }

    #[test]
    fn test_acquisition_requires_stream() {
        let (mut dev, _) = SimDevice::new(SimConfig::new("A"), step_clock(0));
        assert!(dev.acquisition_start().is_err());
    }

    #[test]
    fn test_refused_stream_stop_keeps_stream() {
        let (mut dev, handle) = SimDevice::new(SimConfig::new("A").fail_stop(), step_clock(0));
        dev.stream_setup(4).unwrap();
        assert!(dev.stream_stop().is_err());
        assert!(handle.is_streaming());
        assert_eq!(handle.stream_stops(), 0);
    }
}
