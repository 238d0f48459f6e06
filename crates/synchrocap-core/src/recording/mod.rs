//! Synchronized recording sessions
//!
//! The [`Coordinator`] owns the cameras between sessions. A session is
//! prepared (convergence, offsets, Action Scheduler commit), started (sinks,
//! queues, one capture worker per camera) and finishes on its own once every
//! worker reaches the shared deadline.

mod coordinator;
mod session;
mod sink;
mod slot;
mod worker;

pub use coordinator::{
    estimate_container_bytes, Coordinator, CoordinatorError, CoordinatorEvent, CoordinatorOptions,
    RecordingState, SessionReport, DEFAULT_QUEUE_BUFFERS,
};
pub use session::{create_session_dir, RecordingSession, SessionPlan, SinkKind};
pub use sink::{encoded_file_name, ContainerSink, EncoderSettings, EncoderSink, FrameSink, SinkError};
pub use slot::DeviceSlot;
pub use worker::{DeviceReport, FrameWriteFailure, WorkerOutcome};
