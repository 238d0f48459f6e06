//! Frame sinks: external encoder process or SRAW container
//!
//! A capture worker owns exactly one sink for its camera. Both kinds flush
//! every 30 frames and are closed by [`FrameSink::finish`], which is safe to
//! call more than once. An encoder that stops consuming its input fails the
//! write after a bounded wait.

use crate::container::{ContainerError, ContainerWriter, FileHeader, PixelFormat};
use crate::device::Frame;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Flush the sink every this many frames
const FLUSH_EVERY: u64 = 30;

/// How long `finish` waits for the encoder to exit after stdin closes
const ENCODER_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames queued between the capture worker and the encoder's stdin
const FEED_DEPTH: usize = 8;

/// Longest a frame waits for queue space before the encoder counts as stalled
const ENCODER_STALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to start encoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Encoder exited early ({0})")]
    EncoderExited(String),

    #[error("Encoder stopped reading input for {0:?}")]
    EncoderStalled(Duration),

    #[error("Encoder did not exit within {0:?}, killed")]
    EncoderTimeout(Duration),

    #[error("Encoder stdin write failed: {0}")]
    Pipe(#[source] io::Error),

    #[error("Container write failed: {0}")]
    Container(#[from] ContainerError),
}

/// `cam{serial}.mp4`
pub fn encoded_file_name(serial: &str) -> String {
    format!("cam{serial}.mp4")
}

fn default_program() -> String {
    "ffmpeg".to_string()
}

fn default_input_pix_fmt() -> String {
    "bayer_grbg8".to_string()
}

fn default_codec() -> String {
    "hevc_nvenc".to_string()
}

fn default_bitrate() -> String {
    "2200k".to_string()
}

fn default_bufsize() -> String {
    "4400k".to_string()
}

fn default_preset() -> String {
    "p4".to_string()
}

/// External encoder invocation, shared by every camera of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// Encoder executable, looked up on PATH
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments placed before the generated ones
    #[serde(default)]
    pub program_args: Vec<String>,
    /// ffmpeg name of the input pixel layout
    #[serde(default = "default_input_pix_fmt")]
    pub input_pix_fmt: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_bufsize")]
    pub bufsize: String,
    #[serde(default = "default_preset")]
    pub preset: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            program_args: Vec::new(),
            input_pix_fmt: default_input_pix_fmt(),
            codec: default_codec(),
            bitrate: default_bitrate(),
            bufsize: default_bufsize(),
            preset: default_preset(),
        }
    }
}

impl EncoderSettings {
    /// Arguments for raw frames of `width`x`height` at `fps` on stdin
    pub fn args(&self, width: u32, height: u32, fps: f64, output: &Path) -> Vec<String> {
        let size = format!("{width}x{height}");
        let rate = format_fps(fps);
        let mut args = self.program_args.clone();
        args.extend(
            [
                "-hide_banner",
                "-nostats",
                "-loglevel",
                "error",
                "-f",
                "rawvideo",
                "-pix_fmt",
                self.input_pix_fmt.as_str(),
                "-s",
                size.as_str(),
                "-framerate",
                rate.as_str(),
                "-i",
                "-",
                "-vf",
                "format=yuv420p",
                "-c:v",
                self.codec.as_str(),
                "-b:v",
                self.bitrate.as_str(),
                "-maxrate",
                self.bitrate.as_str(),
                "-bufsize",
                self.bufsize.as_str(),
                "-preset",
                self.preset.as_str(),
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(output.display().to_string());
        args
    }

    /// Spawn the encoder with stdin piped
    pub fn spawn(&self, width: u32, height: u32, fps: f64, output: &Path) -> Result<Child, SinkError> {
        let args = self.args(width, height, fps, output);
        tracing::debug!(program = %self.program, args = ?args, "Spawning encoder");
        Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SinkError::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

/// `30` rather than `30.0`, fractional rates kept as is
fn format_fps(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as i64)
    } else {
        format!("{fps}")
    }
}

/// Destination of one camera's frames
pub trait FrameSink: Send {
    /// Consume one frame's payload
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// False once the sink can no longer accept frames
    fn is_alive(&mut self) -> bool {
        true
    }

    /// Flush and close
    fn finish(&mut self) -> Result<(), SinkError>;

    /// Files produced so far
    fn files(&self) -> Vec<PathBuf>;
}

/// Pipes raw payloads into an encoder process
///
/// A feeder thread owns the encoder's stdin and drains a bounded queue, so
/// an encoder that stops reading blocks `write_frame` for at most the stall
/// timeout instead of indefinitely.
pub struct EncoderSink {
    serial: String,
    child: Child,
    feed: Option<Sender<Vec<u8>>>,
    feeder: Option<JoinHandle<io::Result<()>>>,
    stall_timeout: Duration,
    output: PathBuf,
    finished: bool,
}

impl EncoderSink {
    /// Start the encoder writing `cam{serial}.mp4` in `dir`
    pub fn start(
        settings: &EncoderSettings,
        dir: &Path,
        serial: &str,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self, SinkError> {
        let output = dir.join(encoded_file_name(serial));
        let mut child = settings.spawn(width, height, fps, &output)?;
        let Some(stdin) = child.stdin.take() else {
            kill_encoder(&mut child, serial);
            return Err(SinkError::EncoderExited("stdin unavailable".to_string()));
        };

        let (feed, queue) = crossbeam_channel::bounded(FEED_DEPTH);
        let feeder = match std::thread::Builder::new()
            .name(format!("encoder-feed-{serial}"))
            .spawn(move || feed_encoder(stdin, queue))
        {
            Ok(handle) => handle,
            Err(source) => {
                kill_encoder(&mut child, serial);
                return Err(SinkError::Spawn {
                    program: settings.program.clone(),
                    source,
                });
            }
        };

        tracing::info!(serial = %serial, output = %output.display(), pid = child.id(), "Encoder started");
        Ok(Self {
            serial: serial.to_string(),
            child,
            feed: Some(feed),
            feeder: Some(feeder),
            stall_timeout: ENCODER_STALL_TIMEOUT,
            output,
            finished: false,
        })
    }

    /// Override how long a frame may wait for queue space
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    fn exit_description(status: ExitStatus) -> String {
        match status.code() {
            Some(code) => format!("exit code {code}"),
            None => status.to_string(),
        }
    }

    fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), SinkError> {
        let started = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(
                        serial = %self.serial,
                        status = %Self::exit_description(status),
                        "Encoder exited"
                    );
                    return Ok(());
                }
                Ok(None) if started.elapsed() < timeout => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Ok(None) => {
                    tracing::warn!(serial = %self.serial, "Encoder still running, killing it");
                    kill_encoder(&mut self.child, &self.serial);
                    return Err(SinkError::EncoderTimeout(timeout));
                }
                Err(e) => return Err(SinkError::Pipe(e)),
            }
        }
    }

    /// Collect the feeder once the encoder is gone
    fn join_feeder(&mut self) -> Result<(), SinkError> {
        let Some(handle) = self.feeder.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(Ok(())) => Ok(()),
            // Encoder closed its input first, already reported through is_alive
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!(serial = %self.serial, "Encoder closed its input early");
                Ok(())
            }
            Ok(Err(e)) => Err(SinkError::Pipe(e)),
            Err(_) => Err(SinkError::EncoderExited("stdin feeder panicked".to_string())),
        }
    }
}

/// Copy queued payloads into the encoder until the queue closes
fn feed_encoder(mut stdin: ChildStdin, queue: Receiver<Vec<u8>>) -> io::Result<()> {
    let mut written = 0u64;
    for payload in queue {
        stdin.write_all(&payload)?;
        written += 1;
        if written % FLUSH_EVERY == 0 {
            stdin.flush()?;
        }
    }
    stdin.flush()
}

fn kill_encoder(child: &mut Child, serial: &str) {
    if let Err(e) = child.kill() {
        tracing::debug!(serial = %serial, error = %e, "Encoder kill failed");
    }
    if let Err(e) = child.wait() {
        tracing::warn!(serial = %serial, error = %e, "Encoder wait failed");
    }
}

impl FrameSink for EncoderSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let feed = self
            .feed
            .as_ref()
            .ok_or_else(|| SinkError::EncoderExited("stdin closed".to_string()))?;
        match feed.send_timeout(frame.payload.clone(), self.stall_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SinkError::EncoderStalled(self.stall_timeout)),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(SinkError::EncoderExited("encoder stopped reading input".to_string()))
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        // Closing the queue lets the feeder drain it and close stdin
        self.feed.take();
        let exited = self.wait_with_timeout(ENCODER_EXIT_TIMEOUT);
        let fed = self.join_feeder();
        exited.and(fed)
    }

    fn files(&self) -> Vec<PathBuf> {
        vec![self.output.clone()]
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        if !self.finished {
            self.feed.take();
            kill_encoder(&mut self.child, &self.serial);
            if let Err(e) = self.join_feeder() {
                tracing::debug!(serial = %self.serial, error = %e, "Encoder feeder ended with error");
            }
        }
    }
}

/// Writes frames into split SRAW files
pub struct ContainerSink {
    writer: ContainerWriter,
}

impl ContainerSink {
    /// Open `cam{serial}_000000.raw` and write its header
    pub fn start(
        dir: &Path,
        serial: &str,
        start_timestamp_ns: i64,
        width: u32,
        height: u32,
        frames_per_file: u32,
    ) -> Result<Self, SinkError> {
        let header = FileHeader::new(
            serial,
            start_timestamp_ns,
            width,
            height,
            PixelFormat::BayerGR8,
        )?;
        let writer = ContainerWriter::create(dir, header, frames_per_file)?;
        Ok(Self { writer })
    }

    pub fn frames_written(&self) -> u64 {
        self.writer.frames_written()
    }
}

impl FrameSink for ContainerSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.writer.write_frame(frame.timestamp_ns, &frame.payload)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.finish()?;
        Ok(())
    }

    fn files(&self) -> Vec<PathBuf> {
        self.writer.files().to_vec()
    }
}
