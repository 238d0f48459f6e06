//! Split-on-count container writer

use super::{container_file_name, ContainerError, FileHeader, FrameHeader, PixelFormat};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Flush the open file every this many frames
const FLUSH_EVERY: u64 = 30;

const WRITE_BUFFER: usize = 1 << 20;

/// Append one frame record
pub fn append_frame<W: Write>(
    writer: &mut W,
    frame_index: u64,
    timestamp_ns: i64,
    payload: &[u8],
) -> io::Result<()> {
    let payload_size = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds u32::MAX"))?;
    FrameHeader {
        payload_size,
        frame_index,
        timestamp_ns,
    }
    .write(writer)?;
    writer.write_all(payload)
}

/// Writes one camera's frames, starting a new file every `frames_per_file`
///
/// Frame indices are assigned by the writer and run `0..N` across all files.
/// Every file carries the same header.
pub struct ContainerWriter {
    dir: PathBuf,
    header: FileHeader,
    frames_per_file: u64,
    writer: Option<BufWriter<File>>,
    files: Vec<PathBuf>,
    frames: u64,
}

impl ContainerWriter {
    /// Create the first file and write its header
    ///
    /// # Arguments
    /// * `dir` - session output directory
    /// * `header` - header written at the start of every file
    /// * `frames_per_file` - split threshold, at least 1
    pub fn create(dir: &Path, header: FileHeader, frames_per_file: u32) -> Result<Self, ContainerError> {
        let mut writer = Self {
            dir: dir.to_path_buf(),
            header,
            frames_per_file: u64::from(frames_per_file.max(1)),
            writer: None,
            files: Vec::new(),
            frames: 0,
        };
        writer.open_next()?;
        Ok(writer)
    }

    /// Convenience constructor for a fresh header
    pub fn create_for(
        dir: &Path,
        serial: &str,
        start_timestamp_ns: i64,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        frames_per_file: u32,
    ) -> Result<Self, ContainerError> {
        let header = FileHeader::new(serial, start_timestamp_ns, width, height, pixel_format)?;
        Self::create(dir, header, frames_per_file)
    }

    fn open_next(&mut self) -> Result<(), ContainerError> {
        if let Some(mut previous) = self.writer.take() {
            previous.flush()?;
        }
        let path = self
            .dir
            .join(container_file_name(&self.header.serial, self.frames));
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, File::create(&path)?);
        self.header.write(&mut writer)?;

        tracing::debug!(
            serial = %self.header.serial,
            path = %path.display(),
            first_index = self.frames,
            "Opened container file"
        );
        self.files.push(path);
        self.writer = Some(writer);
        Ok(())
    }

    /// Append a frame, splitting first when the current file is full
    ///
    /// Returns the index assigned to the frame.
    pub fn write_frame(&mut self, timestamp_ns: i64, payload: &[u8]) -> Result<u64, ContainerError> {
        let expected = self.header.frame_size();
        if payload.len() != expected {
            return Err(ContainerError::PayloadSize {
                expected,
                actual: payload.len(),
            });
        }

        if self.frames > 0 && self.frames % self.frames_per_file == 0 {
            self.open_next()?;
        }

        let index = self.frames;
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "container closed").into()),
        };
        append_frame(writer, index, timestamp_ns, payload)?;
        self.frames += 1;

        if self.frames % FLUSH_EVERY == 0 {
            writer.flush()?;
        }
        Ok(index)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Every file created so far, in order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Flush and close the current file
    pub fn finish(&mut self) -> Result<(), ContainerError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}
