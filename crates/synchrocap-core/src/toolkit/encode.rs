//! Re-encode a camera's container files at a constant frame rate
//!
//! Two passes: [`plan_encode`] scans every frame header and builds the
//! [`FramePlan`], then [`EncodeJob::run`] pipes the selected payloads into the
//! external encoder. Duplicated outputs re-send the previous payload without
//! reading the file again.

use super::plan::{build_frame_plan, FramePlan};
use super::ToolkitError;
use crate::container::{
    discover_session, read_frame_payload, FileHeader, FrameInfo, FrameLocations, PixelFormat,
};
use crate::recording::{encoded_file_name, EncoderSettings};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One source frame and the file holding it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLocation {
    /// Index into [`EncodeJob::files`]
    pub file: usize,
    pub info: FrameInfo,
}

/// A planned encode of one camera
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub dir: PathBuf,
    pub serial: String,
    pub output: PathBuf,
    /// Header of the first container file
    pub header: FileHeader,
    /// (path, frames) per container file in first-index order
    pub files: Vec<(PathBuf, usize)>,
    pub locations: Vec<FrameLocation>,
    pub plan: FramePlan,
}

/// Scan `serial`'s container files in `dir` and plan an encode at `fps`
///
/// # Errors
///
/// Input errors: missing directory, unknown serial, an existing output file,
/// a pixel format other than BayerGR8, unreadable or truncated containers, or
/// no frames at all.
pub fn plan_encode(dir: &Path, serial: &str, fps: f64) -> Result<EncodeJob, ToolkitError> {
    if !dir.is_dir() {
        return Err(ToolkitError::NotFound(dir.to_path_buf()));
    }
    let device = discover_session(dir)?
        .into_iter()
        .find(|d| d.serial == serial && !d.containers.is_empty())
        .ok_or_else(|| ToolkitError::UnknownSerial {
            serial: serial.to_string(),
        })?;

    let output = dir.join(encoded_file_name(serial));
    if output.exists() {
        return Err(ToolkitError::OutputExists(output));
    }

    let mut header: Option<FileHeader> = None;
    let mut files = Vec::with_capacity(device.containers.len());
    let mut locations = Vec::new();

    for (_, path) in &device.containers {
        let file_header = FileHeader::read_path(path)?;
        header.get_or_insert(file_header);

        let file = files.len();
        let before = locations.len();
        for info in FrameLocations::open(path)? {
            locations.push(FrameLocation { file, info: info? });
        }
        files.push((path.clone(), locations.len() - before));
    }

    let Some(header) = header else {
        return Err(ToolkitError::NoFrames);
    };
    if header.pixel_format != PixelFormat::BayerGR8 {
        return Err(ToolkitError::UnsupportedPixelFormat(format!(
            "{} ({})",
            header.pixel_format,
            header.pixel_format.code()
        )));
    }
    if locations.is_empty() {
        return Err(ToolkitError::NoFrames);
    }

    let timestamps: Vec<i64> = locations.iter().map(|l| l.info.timestamp_ns).collect();
    let plan = build_frame_plan(&timestamps, fps)?;

    tracing::info!(
        serial = %serial,
        sources = plan.sources,
        outputs = plan.len(),
        duplicated = plan.duplicated,
        skipped = plan.skipped,
        "Encode planned"
    );

    Ok(EncodeJob {
        dir: dir.to_path_buf(),
        serial: serial.to_string(),
        output,
        header,
        files,
        locations,
        plan,
    })
}

impl EncodeJob {
    /// Pipe the planned frames through the encoder
    ///
    /// # Errors
    ///
    /// [`ToolkitError::EncoderSpawn`] when the encoder cannot be started and
    /// [`ToolkitError::EncodingFailed`] when the pipe breaks or the encoder
    /// exits unsuccessfully.
    pub fn run(&self, settings: &EncoderSettings) -> Result<(), ToolkitError> {
        let mut child = settings
            .spawn(
                u32::from(self.header.width),
                u32::from(self.header.height),
                self.plan.target_fps,
                &self.output,
            )
            .map_err(|e| ToolkitError::EncoderSpawn(e.to_string()))?;

        let piped = match child.stdin.take() {
            Some(mut stdin) => self.pipe_frames(&mut stdin),
            None => Err(ToolkitError::EncodingFailed("encoder stdin unavailable".to_string())),
        };
        // stdin is closed here so the encoder sees end of input
        let status = child.wait()?;

        piped?;
        if !status.success() {
            return Err(ToolkitError::EncodingFailed(format!("encoder exited with {status}")));
        }
        tracing::info!(serial = %self.serial, output = %self.output.display(), "Encode finished");
        Ok(())
    }

    fn pipe_frames<W: Write>(&self, out: &mut W) -> Result<(), ToolkitError> {
        let mut open: Option<(usize, File)> = None;
        let mut last: Option<(usize, Vec<u8>)> = None;

        for &position in &self.plan.selection {
            if let Some((previous, payload)) = &last {
                if *previous == position {
                    write_payload(out, payload, self.locations[position].info.frame_index)?;
                    continue;
                }
            }

            let location = &self.locations[position];
            let mut file = match open.take() {
                Some((index, file)) if index == location.file => file,
                _ => File::open(&self.files[location.file].0)?,
            };
            let payload = read_frame_payload(&mut file, &location.info)?;
            open = Some((location.file, file));
            write_payload(out, &payload, location.info.frame_index)?;
            last = Some((position, payload));
        }
        out.flush()
            .map_err(|e| ToolkitError::EncodingFailed(e.to_string()))
    }
}

fn write_payload<W: Write>(out: &mut W, payload: &[u8], frame_index: u64) -> Result<(), ToolkitError> {
    out.write_all(payload).map_err(|e| {
        ToolkitError::EncodingFailed(format!("pipe write failed at frame_index={frame_index}: {e}"))
    })
}

impl fmt::Display for EncodeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let files: Vec<String> = self
            .files
            .iter()
            .map(|(path, count)| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{name} ({count} frames)")
            })
            .collect();

        writeln!(f, "=== Encode: {} cam{} ===", self.dir.display(), self.serial)?;
        writeln!(f, "  Raw files: {}", files.join(", "))?;
        writeln!(f, "  Total raw frames: {}", self.locations.len())?;
        writeln!(f, "  Time span: {:.3} s", self.plan.span_secs())?;
        writeln!(f, "  Raw effective fps: {:.1}", self.plan.source_fps)?;
        writeln!(f, "  MP4 fps: {}", self.plan.target_fps)?;
        writeln!(
            f,
            "  MP4 frames: {} ({} duplicated, {} skipped -- {})",
            self.plan.len(),
            self.plan.duplicated,
            self.plan.skipped,
            self.plan.class
        )?;
        write!(f, "  Output: {}", self.output.display())
    }
}

/// Plan and run an encode in one step
pub fn encode_device(
    dir: &Path,
    serial: &str,
    fps: f64,
    settings: &EncoderSettings,
) -> Result<EncodeJob, ToolkitError> {
    let job = plan_encode(dir, serial, fps)?;
    job.run(settings)?;
    Ok(job)
}
