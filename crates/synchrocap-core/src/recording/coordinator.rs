//! Recording coordinator
//!
//! Drives a group of cameras through one synchronized session:
//!
//! ```text
//! Idle ──prepare──> Preparing ──> Scheduled ──start──> Recording
//!  ^                    │                                  │
//!  └──── failure ───────┘          Idle <── Stopping <─────┘ (all workers done)
//! ```
//!
//! `prepare` waits for PTP convergence, then samples each camera's clock offset
//! and commits the start on its Action Scheduler, one camera at a time.
//! `start` brings up every sink before any camera acquires, then spawns a
//! monitor thread and one capture worker per camera. The monitor joins the
//! workers, tears the session down and returns the coordinator to `Idle`.
//!
//! Progress is published on a crossbeam channel, see [`Coordinator::events`].

use super::session::{RecordingSession, SessionPlan, SinkKind};
use super::sink::{ContainerSink, EncoderSettings, EncoderSink, FrameSink};
use super::slot::DeviceSlot;
use super::worker::{CaptureJob, CaptureReturn, DeviceReport, FrameWriteFailure, WorkerOutcome};
use crate::container::FRAME_HEADER_LEN;
use crate::device::{props, Device, DeviceError};
use crate::framelog::{frame_log_file_name, FrameLog};
use crate::sync::{
    commit_schedule, sample_offset, wait_for_convergence, ConvergencePolicy, ReferenceClock,
    ScheduleError, ScheduledStart, SyncError,
};
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, SendError, Sender};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Default number of queue buffers armed per camera
pub const DEFAULT_QUEUE_BUFFERS: usize = 500;

/// Errors that stop a session before recording begins
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Operation not allowed in state {0}")]
    InvalidState(RecordingState),

    #[error("No cameras given")]
    NoDevices,

    #[error("Invalid session plan: {0}")]
    InvalidPlan(String),

    #[error("Failed to create session directory: {0}")]
    OutputDirectory(#[source] std::io::Error),

    #[error("Camera {serial}: cannot read {property}: {source}")]
    DeviceParameters {
        serial: String,
        property: &'static str,
        #[source]
        source: DeviceError,
    },

    #[error("PTP did not converge within {timeout:?} ({slaves}/{total} cameras Slave)")]
    ConvergenceTimeout {
        timeout: Duration,
        slaves: usize,
        total: usize,
    },

    #[error("Clock offset sampling failed: {0}")]
    OffsetSampling(#[from] SyncError),

    #[error("Schedule commit failed: {0}")]
    ScheduleCommitFailure(#[from] ScheduleError),

    #[error("Camera {serial}: sink start failed: {reason}")]
    SinkStartFailure { serial: String, reason: String },

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Session monitor thread lost")]
    MonitorPanicked,
}

/// Lifecycle state of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Preparing,
    Scheduled,
    Recording,
    Stopping,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Preparing => "Preparing",
            Self::Scheduled => "Scheduled",
            Self::Recording => "Recording",
            Self::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

/// Notifications published while a session progresses
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    StateChanged(RecordingState),
    /// One unsuccessful convergence poll
    Converging { slaves: usize, total: usize },
    /// A camera's start time had passed when its schedule was committed
    ScheduleElapsed { serial: String, late_by_ns: i64 },
    WorkerFinished(DeviceReport),
    SessionFinished(SessionReport),
    /// Preparation or start failed, the coordinator is back to `Idle`
    Aborted { reason: String },
}

/// Result of one complete session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub output_dir: PathBuf,
    pub sink: SinkKind,
    pub created_at: DateTime<Local>,
    /// Scheduled start on the reference clock
    pub reference_target_ns: i64,
    pub duration: Duration,
    pub devices: Vec<DeviceReport>,
}

impl SessionReport {
    pub fn total_frames(&self) -> u64 {
        self.devices.iter().map(|d| d.frames).sum()
    }

    pub fn all_completed(&self) -> bool {
        self.devices.iter().all(DeviceReport::completed)
    }

    pub fn device(&self, serial: &str) -> Option<&DeviceReport> {
        self.devices.iter().find(|d| d.serial == serial)
    }

    /// Log one line per camera plus a summary
    pub fn log(&self) {
        for d in &self.devices {
            let pct = if d.expected_frames > 0 {
                d.frames as f64 * 100.0 / d.expected_frames as f64
            } else {
                0.0
            };
            match &d.outcome {
                WorkerOutcome::Completed => tracing::info!(
                    serial = %d.serial,
                    frames = d.frames,
                    expected = d.expected_frames,
                    percent = %format!("{pct:.1}"),
                    "Camera recording complete"
                ),
                WorkerOutcome::Aborted(failure) => tracing::warn!(
                    serial = %d.serial,
                    frames = d.frames,
                    expected = d.expected_frames,
                    percent = %format!("{pct:.1}"),
                    error = %failure,
                    "Camera recording aborted"
                ),
            }
        }
        tracing::info!(
            dir = %self.output_dir.display(),
            cameras = self.devices.len(),
            total_frames = self.total_frames(),
            all_completed = self.all_completed(),
            "Session finished"
        );
    }
}

/// Settings that outlive a single session
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Sessions are created as subdirectories of this
    pub output_root: PathBuf,
    pub queue_buffer_count: usize,
    pub convergence: ConvergencePolicy,
    pub encoder: EncoderSettings,
}

impl CoordinatorOptions {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            queue_buffer_count: DEFAULT_QUEUE_BUFFERS,
            convergence: ConvergencePolicy::default(),
            encoder: EncoderSettings::default(),
        }
    }
}

/// A session between `prepare` and `start`
struct Prepared {
    session: RecordingSession,
    schedule: ScheduledStart,
}

/// State shared with the monitor thread
struct Shared {
    state: RecordingState,
    /// Slots of the current or last session
    slots: Vec<DeviceSlot>,
    /// Slots handed to a `prepare` that was refused
    parked: Vec<DeviceSlot>,
}

/// Orchestrates synchronized recording sessions
pub struct Coordinator {
    options: CoordinatorOptions,
    clock: Arc<dyn ReferenceClock>,
    shared: Arc<Mutex<Shared>>,
    prepared: Option<Prepared>,
    monitor: Option<JoinHandle<Option<SessionReport>>>,
    events_tx: Sender<CoordinatorEvent>,
    events_rx: Receiver<CoordinatorEvent>,
}

impl Coordinator {
    pub fn new(options: CoordinatorOptions, clock: Arc<dyn ReferenceClock>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            options,
            clock,
            shared: Arc::new(Mutex::new(Shared {
                state: RecordingState::Idle,
                slots: Vec::new(),
                parked: Vec::new(),
            })),
            prepared: None,
            monitor: None,
            events_tx,
            events_rx,
        }
    }

    /// Receiver for progress events
    ///
    /// Events are buffered until read; callers that never read them only
    /// cost memory.
    pub fn events(&self) -> Receiver<CoordinatorEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> RecordingState {
        match self.shared.lock() {
            Ok(shared) => shared.state,
            Err(poisoned) => poisoned.into_inner().state,
        }
    }

    /// Scheduled start of the prepared session
    pub fn schedule(&self) -> Option<&ScheduledStart> {
        self.prepared.as_ref().map(|p| &p.schedule)
    }

    /// Output directory of the prepared session
    pub fn output_dir(&self) -> Option<&std::path::Path> {
        self.prepared.as_ref().map(|p| p.session.output_dir.as_path())
    }

    fn with_shared<T>(&self, f: impl FnOnce(&mut Shared) -> T) -> T {
        with_shared(&self.shared, f)
    }

    fn set_state(&self, state: RecordingState) {
        set_state(&self.shared, &self.events_tx, state);
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Return to `Idle` after a failed prepare or start
    fn abort(&mut self, slots: Vec<DeviceSlot>, error: CoordinatorError) -> CoordinatorError {
        tracing::error!(error = %error, "Session aborted before recording");
        self.prepared = None;
        self.with_shared(|s| s.parked.extend(slots));
        self.set_state(RecordingState::Idle);
        self.emit(CoordinatorEvent::Aborted {
            reason: error.to_string(),
        });
        error
    }

    /// Converge, measure offsets and commit the session start
    ///
    /// Only allowed while `Idle`. If it is called in any other state the slots
    /// are kept aside and can be taken back with [`Self::release_devices`].
    ///
    /// # Arguments
    /// * `slots` - cameras for this session
    /// * `plan` - delay, duration and sink of the session
    pub fn prepare(
        &mut self,
        mut slots: Vec<DeviceSlot>,
        plan: SessionPlan,
    ) -> Result<ScheduledStart, CoordinatorError> {
        let state = self.state();
        if state != RecordingState::Idle {
            tracing::warn!(state = %state, "prepare() refused, coordinator busy");
            self.with_shared(|s| s.parked.extend(slots));
            return Err(CoordinatorError::InvalidState(state));
        }
        if slots.is_empty() {
            return Err(self.abort(slots, CoordinatorError::NoDevices));
        }
        if let Err(reason) = plan.validate() {
            return Err(self.abort(slots, CoordinatorError::InvalidPlan(reason)));
        }

        self.set_state(RecordingState::Preparing);

        if let Err(e) = slots
            .iter_mut()
            .try_for_each(|slot| read_parameters(slot, &plan))
        {
            return Err(self.abort(slots, e));
        }

        if let Err(e) = self.converge(&slots) {
            return Err(self.abort(slots, e));
        }

        let schedule = match self.schedule_all(&mut slots, &plan) {
            Ok(schedule) => schedule,
            Err(e) => {
                cancel_schedules(&mut slots);
                return Err(self.abort(slots, e));
            }
        };

        // Only a session that is going to record gets a directory
        let session = match RecordingSession::create(plan, &self.options.output_root) {
            Ok(session) => session,
            Err(e) => {
                cancel_schedules(&mut slots);
                return Err(self.abort(slots, CoordinatorError::OutputDirectory(e)));
            }
        };

        self.with_shared(|s| {
            let previous = std::mem::replace(&mut s.slots, slots);
            s.parked.extend(previous);
        });
        self.prepared = Some(Prepared {
            session,
            schedule: schedule.clone(),
        });
        self.set_state(RecordingState::Scheduled);
        Ok(schedule)
    }

    fn converge(&self, slots: &[DeviceSlot]) -> Result<(), CoordinatorError> {
        let devices: Vec<&dyn Device> = slots.iter().map(DeviceSlot::device).collect();
        let policy = self.options.convergence;
        tracing::info!(cameras = devices.len(), timeout = ?policy.timeout, "Waiting for PTP convergence");

        wait_for_convergence(&devices, policy, |tally| {
            tracing::info!(slaves = tally.slaves, total = tally.total(), "PTP not converged yet");
            self.emit(CoordinatorEvent::Converging {
                slaves: tally.slaves,
                total: tally.total(),
            });
        })
        .map(|_| ())
        .map_err(|tally| CoordinatorError::ConvergenceTimeout {
            timeout: policy.timeout,
            slaves: tally.slaves,
            total: tally.total(),
        })
    }

    /// Sample and commit camera by camera against one reference target
    fn schedule_all(
        &self,
        slots: &mut [DeviceSlot],
        plan: &SessionPlan,
    ) -> Result<ScheduledStart, CoordinatorError> {
        let mut schedule = ScheduledStart::new(self.clock.now_ns(), plan.start_delay);
        tracing::info!(
            reference_target_ns = schedule.reference_target_ns,
            delay = ?plan.start_delay,
            "Session start fixed"
        );

        for slot in slots.iter_mut() {
            let sample = sample_offset(slot.device.as_mut(), self.clock.as_ref())?;
            slot.offset_ns = sample.offset_ns();

            let device_schedule = schedule.schedule_device(slot.offset_ns, slot.trigger_rate_hz)?;
            slot.device_target_ns = device_schedule.device_target_ns;

            let outcome = commit_schedule(
                slot.device.as_mut(),
                &device_schedule,
                self.clock.as_ref(),
                slot.offset_ns,
            )?;
            if let Some(late_by_ns) = outcome.late_by_ns {
                self.emit(CoordinatorEvent::ScheduleElapsed {
                    serial: slot.serial().to_string(),
                    late_by_ns,
                });
            }

            tracing::info!(
                serial = %slot.serial(),
                offset_ns = slot.offset_ns,
                uncertainty_ns = sample.uncertainty_ns(),
                device_target_ns = slot.device_target_ns,
                "Camera scheduled"
            );
        }
        Ok(schedule)
    }

    /// Start sinks, arm queues and launch the capture workers
    pub fn start(&mut self) -> Result<(), CoordinatorError> {
        let state = self.state();
        if state != RecordingState::Scheduled {
            return Err(CoordinatorError::InvalidState(state));
        }
        let Some(prepared) = self.prepared.take() else {
            return Err(CoordinatorError::InvalidState(state));
        };
        let mut slots = self.with_shared(|s| std::mem::take(&mut s.slots));

        let mut started: Vec<(Box<dyn FrameSink>, Option<FrameLog>)> = Vec::with_capacity(slots.len());
        let mut failure = None;
        for slot in &mut slots {
            match self.start_slot(slot, &prepared.session) {
                Ok(pair) => started.push(pair),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            teardown_started(&mut slots, started);
            cancel_schedules(&mut slots);
            return Err(self.abort(slots, e));
        }

        // The monitor is running before any worker is
        let (handoff, pending) = crossbeam_channel::bounded::<Monitor>(1);
        let monitor_handle = match std::thread::Builder::new()
            .name("session-monitor".into())
            .spawn(move || pending.recv().ok().map(Monitor::run))
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn session monitor");
                teardown_started(&mut slots, started);
                cancel_schedules(&mut slots);
                return Err(self.abort(slots, CoordinatorError::ThreadSpawn(e)));
            }
        };

        let plan = &prepared.session.plan;
        if plan.sink == SinkKind::Container {
            log_disk_estimate(&slots, plan);
        }

        let deadline_ns = prepared
            .schedule
            .reference_target_ns
            .saturating_add(i64::try_from(plan.duration.as_nanos()).unwrap_or(i64::MAX));

        let mut handles = Vec::with_capacity(slots.len());
        let mut spawn_failures = Vec::new();
        for (slot, (sink, frame_log)) in slots.into_iter().zip(started) {
            let serial = slot.serial().to_string();
            let expected_frames = plan.expected_frames(slot.trigger_rate_hz);
            let job = CaptureJob {
                slot,
                sink,
                frame_log,
                clock: Arc::clone(&self.clock),
                deadline_ns,
                expected_frames,
            };
            match std::thread::Builder::new()
                .name(format!("capture-{serial}"))
                .spawn(move || job.run())
            {
                Ok(handle) => handles.push((serial, handle)),
                Err(e) => {
                    tracing::error!(serial = %serial, error = %e, "Failed to spawn capture worker");
                    spawn_failures.push(DeviceReport {
                        serial,
                        frames: 0,
                        expected_frames,
                        files: Vec::new(),
                        outcome: WorkerOutcome::Aborted(FrameWriteFailure::ThreadSpawn(e.to_string())),
                        stopped_at_ns: self.clock.now_ns(),
                        teardown_failures: Vec::new(),
                    });
                }
            }
        }

        self.set_state(RecordingState::Recording);
        tracing::info!(
            cameras = handles.len(),
            dir = %prepared.session.output_dir.display(),
            "Recording started"
        );

        let monitor = Monitor {
            handles,
            spawn_failures,
            session: prepared.session,
            reference_target_ns: prepared.schedule.reference_target_ns,
            shared: Arc::clone(&self.shared),
            events: self.events_tx.clone(),
        };
        hand_off(&handoff, monitor)?;
        self.monitor = Some(monitor_handle);
        Ok(())
    }

    fn start_slot(
        &self,
        slot: &mut DeviceSlot,
        session: &RecordingSession,
    ) -> Result<(Box<dyn FrameSink>, Option<FrameLog>), CoordinatorError> {
        let serial = slot.serial().to_string();
        let dir = &session.output_dir;
        let plan = &session.plan;
        slot.frames = 0;

        let frame_log = match FrameLog::create(&dir.join(frame_log_file_name(&serial))) {
            Ok(log) => Some(log),
            Err(e) => {
                tracing::warn!(serial = %serial, error = %e, "Frame log unavailable, recording without it");
                None
            }
        };

        let sink_failure = |reason: String| CoordinatorError::SinkStartFailure {
            serial: serial.clone(),
            reason,
        };

        let sink: Box<dyn FrameSink> = match plan.sink {
            SinkKind::Encoded => Box::new(
                EncoderSink::start(
                    &self.options.encoder,
                    dir,
                    &serial,
                    slot.width,
                    slot.height,
                    slot.trigger_rate_hz,
                )
                .map_err(|e| sink_failure(e.to_string()))?,
            ),
            SinkKind::Container => Box::new(
                ContainerSink::start(
                    dir,
                    &serial,
                    slot.device_target_ns,
                    slot.width,
                    slot.height,
                    plan.frames_per_file,
                )
                .map_err(|e| sink_failure(e.to_string()))?,
            ),
        };

        if slot.device.is_streaming() {
            tracing::info!(serial = %serial, "Stopping preview stream");
            if let Err(e) = slot.device.acquisition_stop() {
                tracing::warn!(serial = %serial, error = %e, "Preview acquisition stop failed");
            }
            if let Err(e) = slot.device.stream_stop() {
                tracing::warn!(serial = %serial, error = %e, "Preview stream stop failed");
            }
        }
        if let Err(e) = slot.device.stream_setup(self.options.queue_buffer_count) {
            let mut sink = sink;
            if let Err(finish) = sink.finish() {
                tracing::warn!(serial = %serial, error = %finish, "Sink teardown failed");
            }
            if let Some(mut log) = frame_log {
                if let Err(close) = log.finish() {
                    tracing::warn!(serial = %serial, error = %close, "Frame log close failed");
                }
            }
            return Err(sink_failure(format!("stream setup: {e}")));
        }

        tracing::info!(
            serial = %serial,
            sink = %plan.sink,
            buffers = self.options.queue_buffer_count,
            "Camera armed"
        );
        Ok((sink, frame_log))
    }

    /// Block until the running session has been torn down
    pub fn wait(&mut self) -> Result<SessionReport, CoordinatorError> {
        let Some(handle) = self.monitor.take() else {
            return Err(CoordinatorError::InvalidState(self.state()));
        };
        handle
            .join()
            .ok()
            .flatten()
            .ok_or(CoordinatorError::MonitorPanicked)
    }

    /// Take the cameras back, only while `Idle`
    pub fn release_devices(&mut self) -> Result<Vec<DeviceSlot>, CoordinatorError> {
        let state = self.state();
        if state != RecordingState::Idle {
            return Err(CoordinatorError::InvalidState(state));
        }
        Ok(self.with_shared(|s| {
            let mut slots = std::mem::take(&mut s.slots);
            slots.append(&mut s.parked);
            slots
        }))
    }
}

/// Joins the workers and tears the session down
struct Monitor {
    handles: Vec<(String, JoinHandle<CaptureReturn>)>,
    spawn_failures: Vec<DeviceReport>,
    session: RecordingSession,
    reference_target_ns: i64,
    shared: Arc<Mutex<Shared>>,
    events: Sender<CoordinatorEvent>,
}

impl Monitor {
    fn run(self) -> SessionReport {
        let mut returned = Vec::with_capacity(self.handles.len());
        let mut reports = self.spawn_failures;

        for (serial, handle) in self.handles {
            match handle.join() {
                Ok(ret) => {
                    let _ = self
                        .events
                        .send(CoordinatorEvent::WorkerFinished(ret.report.clone()));
                    returned.push(ret);
                }
                Err(_) => {
                    tracing::error!(serial = %serial, "Capture worker lost, device not returned");
                    reports.push(DeviceReport {
                        serial: serial.clone(),
                        frames: 0,
                        expected_frames: 0,
                        files: Vec::new(),
                        outcome: WorkerOutcome::Aborted(FrameWriteFailure::Panicked(
                            "worker thread did not return".to_string(),
                        )),
                        stopped_at_ns: 0,
                        teardown_failures: Vec::new(),
                    });
                }
            }
        }

        set_state(&self.shared, &self.events, RecordingState::Stopping);

        let mut slots = Vec::with_capacity(returned.len());
        for CaptureReturn {
            mut slot,
            mut sink,
            mut report,
        } in returned
        {
            report.teardown_failures.extend(final_teardown(&mut slot, sink.as_mut()));
            reports.push(report);
            slots.push(slot);
        }
        reports.sort_by(|a, b| a.serial.cmp(&b.serial));

        let report = SessionReport {
            output_dir: self.session.output_dir,
            sink: self.session.plan.sink,
            created_at: self.session.created_at,
            reference_target_ns: self.reference_target_ns,
            duration: self.session.plan.duration,
            devices: reports,
        };
        report.log();

        with_shared(&self.shared, |s| s.slots.extend(slots));
        set_state(&self.shared, &self.events, RecordingState::Idle);
        let _ = self.events.send(CoordinatorEvent::SessionFinished(report.clone()));
        report
    }
}

fn with_shared<T>(shared: &Mutex<Shared>, f: impl FnOnce(&mut Shared) -> T) -> T {
    match shared.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

fn set_state(shared: &Mutex<Shared>, events: &Sender<CoordinatorEvent>, state: RecordingState) {
    let previous = with_shared(shared, |s| std::mem::replace(&mut s.state, state));
    if previous != state {
        tracing::debug!(from = %previous, to = %state, "Coordinator state changed");
        let _ = events.send(CoordinatorEvent::StateChanged(state));
    }
}

/// Width, height and trigger rate for one camera
fn read_parameters(slot: &mut DeviceSlot, plan: &SessionPlan) -> Result<(), CoordinatorError> {
    let serial = slot.serial().to_string();
    let read = |property: &'static str| {
        slot.device
            .get_int(property)
            .map_err(|source| CoordinatorError::DeviceParameters {
                serial: serial.clone(),
                property,
                source,
            })
    };
    let width = read(props::WIDTH)?;
    let height = read(props::HEIGHT)?;

    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(CoordinatorError::DeviceParameters {
            serial,
            property: props::WIDTH,
            source: DeviceError::rejected(props::WIDTH, format!("invalid size {width}x{height}")),
        });
    };

    let rate = match slot.requested_rate_hz {
        Some(rate) => rate,
        None => slot
            .device
            .get_float(props::ACQUISITION_FRAME_RATE)
            .ok()
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(plan.default_trigger_rate_hz),
    };

    slot.width = width;
    slot.height = height;
    slot.trigger_rate_hz = rate;
    tracing::debug!(serial = %serial, width, height, rate_hz = rate, "Camera parameters");
    Ok(())
}

/// Best-effort cancel of already committed schedules
fn cancel_schedules(slots: &mut [DeviceSlot]) {
    for slot in slots {
        if let Err(e) = slot.device.execute(props::ACTION_SCHEDULER_CANCEL) {
            tracing::debug!(serial = %slot.serial(), error = %e, "Schedule cancel failed");
        }
    }
}

/// Undo a partial `start`: close the sinks that were opened, disarm queues
fn teardown_started(slots: &mut [DeviceSlot], started: Vec<(Box<dyn FrameSink>, Option<FrameLog>)>) {
    // Sinks were started in slot order
    for (slot, (mut sink, frame_log)) in slots.iter().zip(started) {
        if let Err(e) = sink.finish() {
            tracing::warn!(serial = %slot.serial(), error = %e, "Sink teardown failed");
        }
        if let Some(mut log) = frame_log {
            if let Err(e) = log.finish() {
                tracing::warn!(serial = %slot.serial(), error = %e, "Frame log close failed");
            }
        }
    }
    for slot in slots {
        if slot.device.is_streaming() {
            if let Err(e) = slot.device.stream_stop() {
                tracing::warn!(serial = %slot.serial(), error = %e, "Stream stop failed");
            }
        }
    }
}

/// Give the monitor to its thread, or finish the session here if that thread is gone
fn hand_off(handoff: &Sender<Monitor>, monitor: Monitor) -> Result<(), CoordinatorError> {
    match handoff.send(monitor) {
        Ok(()) => Ok(()),
        Err(SendError(monitor)) => {
            tracing::error!("Session monitor gone before handoff, tearing down inline");
            monitor.run();
            Err(CoordinatorError::MonitorPanicked)
        }
    }
}

/// Close everything that the worker's stop sequence may have left open
fn final_teardown(slot: &mut DeviceSlot, sink: &mut dyn FrameSink) -> Vec<String> {
    let mut failures = Vec::new();
    if let Err(e) = sink.finish() {
        failures.push(format!("sink finish: {e}"));
    }
    if slot.device.is_streaming() {
        if let Err(e) = slot.device.acquisition_stop() {
            failures.push(format!("acquisition stop: {e}"));
        }
        if let Err(e) = slot.device.stream_stop() {
            failures.push(format!("stream stop: {e}"));
        }
    }
    for failure in &failures {
        tracing::warn!(serial = %slot.serial(), failure = %failure, "Session teardown step failed");
    }
    failures
}

/// Raw bytes the session will write, headers included
pub fn estimate_container_bytes(frame_size: usize, trigger_rate_hz: f64, duration: Duration) -> u64 {
    let frames = (duration.as_secs_f64() * trigger_rate_hz).ceil() as u64;
    frames * (frame_size + FRAME_HEADER_LEN) as u64
}

fn log_disk_estimate(slots: &[DeviceSlot], plan: &SessionPlan) {
    let total: u64 = slots
        .iter()
        .map(|s| estimate_container_bytes(s.frame_size(), s.trigger_rate_hz, plan.duration))
        .sum();
    tracing::info!(
        cameras = slots.len(),
        gib = %format!("{:.2}", total as f64 / (1u64 << 30) as f64),
        "Estimated raw disk usage"
    );
}
