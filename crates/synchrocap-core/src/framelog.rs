//! Per-camera frame timestamp log
//!
//! ## File Format
//!
//! CSV named `cam{serial}.csv` next to the recorded data:
//!
//! ```text
//! frame_number,device_timestamp_ns
//! 00000,1718000000000000000
//! 00001,1718000000020000000
//! ```
//!
//! Frame numbers are the device's own counter, zero padded to five digits.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FRAME_LOG_HEADER: &str = "frame_number,device_timestamp_ns";

/// Flush after this many rows
const FLUSH_EVERY: u64 = 10;

#[derive(Error, Debug)]
pub enum FrameLogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{path}:{line}: malformed row {content:?}")]
    Parse {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// `cam{serial}.csv`
pub fn frame_log_file_name(serial: &str) -> String {
    format!("cam{serial}.csv")
}

/// One row of a frame log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLogRow {
    pub frame_number: u64,
    pub timestamp_ns: i64,
}

/// Buffered frame log writer
pub struct FrameLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows: u64,
}

impl FrameLog {
    /// Create the file and write the header row
    pub fn create(path: &Path) -> Result<Self, FrameLogError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{FRAME_LOG_HEADER}")?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            rows: 0,
        })
    }

    pub fn append(&mut self, frame_number: u64, timestamp_ns: i64) -> Result<(), FrameLogError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "frame log closed").into());
        };
        writeln!(writer, "{frame_number:05},{timestamp_ns}")?;
        self.rows += 1;
        if self.rows % FLUSH_EVERY == 0 {
            writer.flush()?;
        }
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close; further appends fail
    pub fn finish(&mut self) -> Result<(), FrameLogError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Read every row of a frame log
///
/// The header row and blank lines are skipped.
pub fn read_frame_log(path: &Path) -> Result<Vec<FrameLogRow>, FrameLogError> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || (i == 0 && trimmed.starts_with("frame_number")) {
            continue;
        }
        let parsed = trimmed.split_once(',').and_then(|(frame, ts)| {
            Some(FrameLogRow {
                frame_number: frame.trim().parse().ok()?,
                timestamp_ns: ts.trim().parse().ok()?,
            })
        });
        match parsed {
            Some(row) => rows.push(row),
            None => {
                return Err(FrameLogError::Parse {
                    path: path.to_path_buf(),
                    line: i + 1,
                    content: line.clone(),
                })
            }
        }
    }
    Ok(rows)
}
