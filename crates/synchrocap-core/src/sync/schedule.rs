//! Action Scheduler trigger planning
//!
//! A relative start delay becomes one absolute target on the reference clock,
//! shared by the whole session. Each camera gets that target translated into
//! its own clock domain by adding its measured offset, plus a fixed trigger
//! interval derived from its frame rate.
//!
//! Committing writes the schedule to the camera's Action Scheduler. A target
//! that has already elapsed at commit time is left as is: the camera fires
//! immediately and the lateness is reported to the caller.

use super::clock::ReferenceClock;
use crate::device::{props, Device, DeviceError};
use std::time::Duration;
use thiserror::Error;

/// Errors from committing a trigger schedule
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Camera {serial} rejected {property}: {source}")]
    CommitRejected {
        serial: String,
        property: &'static str,
        #[source]
        source: DeviceError,
    },

    #[error("Invalid trigger rate {rate_hz} Hz")]
    InvalidRate { rate_hz: f64 },
}

/// Per-device input to [`build_schedule`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleInput {
    /// Device clock minus reference clock
    pub offset_ns: i64,
    pub trigger_rate_hz: f64,
}

/// Trigger parameters for one camera, in its own clock domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSchedule {
    pub device_target_ns: i64,
    pub interval_us: i64,
}

/// Session start shared by every camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledStart {
    /// Absolute start on the reference clock
    pub reference_target_ns: i64,
    /// One entry per scheduled camera, in scheduling order
    pub devices: Vec<DeviceSchedule>,
}

impl ScheduledStart {
    /// Fix the reference target at `reference_now_ns + start_delay`
    pub fn new(reference_now_ns: i64, start_delay: Duration) -> Self {
        let delay_ns = i64::try_from(start_delay.as_nanos()).unwrap_or(i64::MAX);
        Self {
            reference_target_ns: reference_now_ns.saturating_add(delay_ns),
            devices: Vec::new(),
        }
    }

    /// Translate the target into one more camera's clock domain
    ///
    /// # Arguments
    /// * `offset_ns` - measured device minus reference offset
    /// * `trigger_rate_hz` - requested trigger rate, must be positive
    pub fn schedule_device(
        &mut self,
        offset_ns: i64,
        trigger_rate_hz: f64,
    ) -> Result<DeviceSchedule, ScheduleError> {
        let schedule = DeviceSchedule {
            device_target_ns: self.reference_target_ns.saturating_add(offset_ns),
            interval_us: interval_us_for_rate(trigger_rate_hz)?,
        };
        self.devices.push(schedule);
        Ok(schedule)
    }
}

/// Trigger period in whole microseconds, `round(1e6 / rate)`
pub fn interval_us_for_rate(rate_hz: f64) -> Result<i64, ScheduleError> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return Err(ScheduleError::InvalidRate { rate_hz });
    }
    Ok((1_000_000.0 / rate_hz).round() as i64)
}

/// Compute a complete session schedule in one go
///
/// Identical inputs give identical output.
pub fn build_schedule(
    reference_now_ns: i64,
    start_delay: Duration,
    inputs: &[ScheduleInput],
) -> Result<ScheduledStart, ScheduleError> {
    let mut start = ScheduledStart::new(reference_now_ns, start_delay);
    for input in inputs {
        start.schedule_device(input.offset_ns, input.trigger_rate_hz)?;
    }
    Ok(start)
}

/// Result of a successful commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// How far the target was already in the past at commit time
    pub late_by_ns: Option<i64>,
}

/// Write a schedule to the camera's Action Scheduler
///
/// The cancel and trigger-routing writes are best effort. Time, interval and
/// commit must all succeed; without the interval only the first trigger fires.
///
/// # Arguments
/// * `device` - camera to program
/// * `schedule` - target and interval in the camera's clock domain
/// * `clock` - reference clock, used to detect an elapsed target
/// * `offset_ns` - the offset the schedule was built with
pub fn commit_schedule(
    device: &mut dyn Device,
    schedule: &DeviceSchedule,
    clock: &dyn ReferenceClock,
    offset_ns: i64,
) -> Result<CommitOutcome, ScheduleError> {
    let serial = device.serial().to_string();

    if let Err(e) = device.execute(props::ACTION_SCHEDULER_CANCEL) {
        tracing::debug!(serial = %serial, error = %e, "ActionSchedulerCancel not accepted");
    }

    for (name, value) in [
        (props::TRIGGER_SELECTOR, "FrameStart"),
        (props::TRIGGER_SOURCE, "Action0"),
        (props::TRIGGER_MODE, "On"),
    ] {
        if let Err(e) = device.set_string(name, value) {
            tracing::warn!(serial = %serial, property = name, value, error = %e, "Trigger setup rejected");
        }
    }

    let rejected = |property: &'static str| {
        let serial = serial.clone();
        move |source: DeviceError| ScheduleError::CommitRejected {
            serial,
            property,
            source,
        }
    };

    device
        .set_int(props::ACTION_SCHEDULER_TIME, schedule.device_target_ns)
        .map_err(rejected(props::ACTION_SCHEDULER_TIME))?;
    device
        .set_int(props::ACTION_SCHEDULER_INTERVAL, schedule.interval_us)
        .map_err(rejected(props::ACTION_SCHEDULER_INTERVAL))?;

    let device_now_ns = clock.now_ns().saturating_add(offset_ns);
    device
        .execute(props::ACTION_SCHEDULER_COMMIT)
        .map_err(rejected(props::ACTION_SCHEDULER_COMMIT))?;

    let late_by_ns = (device_now_ns > schedule.device_target_ns)
        .then(|| device_now_ns - schedule.device_target_ns);

    match late_by_ns {
        Some(late) => tracing::warn!(
            serial = %serial,
            late_ms = late as f64 / 1e6,
            "Scheduled start already elapsed at commit; camera fires immediately"
        ),
        None => tracing::info!(
            serial = %serial,
            device_target_ns = schedule.device_target_ns,
            interval_us = schedule.interval_us,
            lead_ms = (schedule.device_target_ns - device_now_ns) as f64 / 1e6,
            "Action scheduler committed"
        ),
    }

    Ok(CommitOutcome { late_by_ns })
}
