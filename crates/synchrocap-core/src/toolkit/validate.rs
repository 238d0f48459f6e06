//! Structural validation of recorded container sessions
//!
//! Each camera's split files are checked in first-index order:
//!
//! | ID | Check |
//! |----|-------|
//! | V1 | file header magic is `SRAW` |
//! | V2 | file header version is 1 |
//! | V3 | every frame header magic is `FRAM` |
//! | V4 | payload size is `width * height * bytes_per_pixel` |
//! | V5 | frame indices run `0..N-1` across all files |
//! | V6 | timestamps strictly increase |
//! | V7 | frame log row count equals the frame count |
//! | V8 | frame log timestamps equal container timestamps |
//!
//! V7 and V8 are skipped when the camera has no frame log. A file or log
//! that cannot be read counts as a failure.

use super::ToolkitError;
use crate::container::{
    discover_session, DeviceFiles, FileHeader, FrameInfo, FrameLocations, FILE_HEADER_LEN,
    FILE_MAGIC, FORMAT_VERSION, FRAME_MAGIC,
};
use crate::framelog::read_frame_log;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub id: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn pass(id: &'static str, message: impl Into<String>) -> Self {
        Self {
            id,
            status: CheckStatus::Pass,
            message: message.into(),
        }
    }

    fn fail(id: &'static str, message: impl Into<String>) -> Self {
        Self {
            id,
            status: CheckStatus::Fail,
            message: message.into(),
        }
    }

    fn skip(id: &'static str, message: impl Into<String>) -> Self {
        Self {
            id,
            status: CheckStatus::Skip,
            message: message.into(),
        }
    }
}

/// Validation result for one camera
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceValidation {
    pub serial: String,
    /// (file name, frames found) per container file
    pub files: Vec<(String, usize)>,
    /// `None` when the camera has no frame log
    pub frame_log: Option<(String, usize)>,
    /// Files that could not be read, each counted as a failure
    pub read_errors: Vec<String>,
    pub checks: Vec<CheckResult>,
}

impl DeviceValidation {
    pub fn passed(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Pass)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.read_errors.len()
            + self
                .checks
                .iter()
                .filter(|c| c.status == CheckStatus::Fail)
                .count()
    }

    pub fn check(&self, id: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.id == id)
    }
}

impl fmt::Display for DeviceValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- cam{} ---", self.serial)?;
        if self.files.is_empty() && self.read_errors.is_empty() {
            return writeln!(f, "  [SKIP] No raw files found");
        }
        for error in &self.read_errors {
            writeln!(f, "  [ERROR] {error}")?;
        }
        if !self.files.is_empty() {
            let desc: Vec<String> = self
                .files
                .iter()
                .map(|(name, count)| format!("{name} ({count} frames)"))
                .collect();
            writeln!(f, "  Raw files: {}", desc.join(", "))?;
            match &self.frame_log {
                Some((name, rows)) => writeln!(f, "  CSV file:  {name} ({rows} rows)")?,
                None => writeln!(f, "  CSV file:  (not found)")?,
            }
        }
        for check in &self.checks {
            writeln!(f, "  [{}] {}: {}", check.status, check.id, check.message)?;
        }
        Ok(())
    }
}

/// Validation result for a whole session directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionValidation {
    pub dir: PathBuf,
    pub devices: Vec<DeviceValidation>,
}

impl SessionValidation {
    pub fn passed(&self) -> usize {
        self.devices.iter().map(DeviceValidation::passed).sum()
    }

    pub fn failed(&self) -> usize {
        self.devices.iter().map(DeviceValidation::failed).sum()
    }

    pub fn is_valid(&self) -> bool {
        self.failed() == 0
    }

    pub fn device(&self, serial: &str) -> Option<&DeviceValidation> {
        self.devices.iter().find(|d| d.serial == serial)
    }
}

impl fmt::Display for SessionValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Validating session: {} ===", self.dir.display())?;
        writeln!(f)?;
        for device in &self.devices {
            write!(f, "{device}")?;
            writeln!(f)?;
        }
        let (passed, failed) = (self.passed(), self.failed());
        let total = passed + failed;
        if failed == 0 {
            write!(
                f,
                "=== Result: {passed}/{total} PASS ({} cameras) ===",
                self.devices.len()
            )
        } else {
            write!(
                f,
                "=== Result: {passed}/{total} PASS, {failed} FAIL ({} cameras) ===",
                self.devices.len()
            )
        }
    }
}

/// Validate every camera found in `dir`
///
/// # Errors
///
/// [`ToolkitError::NotFound`] when `dir` is not a directory and
/// [`ToolkitError::NoSessionFiles`] when it holds no container or log files.
/// Problems inside the files are reported as failed checks, not errors.
pub fn validate_session(dir: &Path) -> Result<SessionValidation, ToolkitError> {
    if !dir.is_dir() {
        return Err(ToolkitError::NotFound(dir.to_path_buf()));
    }
    let devices = discover_session(dir)?;
    if devices.is_empty() {
        return Err(ToolkitError::NoSessionFiles(dir.to_path_buf()));
    }

    let devices: Vec<DeviceValidation> = devices.iter().map(validate_device).collect();
    let validation = SessionValidation {
        dir: dir.to_path_buf(),
        devices,
    };
    tracing::info!(
        dir = %dir.display(),
        cameras = validation.devices.len(),
        passed = validation.passed(),
        failed = validation.failed(),
        "Session validated"
    );
    Ok(validation)
}

/// Raw header fields of one container file
struct ScannedFile {
    name: String,
    magic: [u8; 4],
    version: u32,
    header: Option<FileHeader>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read the header bytes as stored, plus the parsed header when it is well formed
fn scan_header(path: &Path) -> Result<ScannedFile, ToolkitError> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; FILE_HEADER_LEN];
    file.read_exact(&mut buf)?;

    let magic = [buf[0], buf[1], buf[2], buf[3]];
    let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let header = if magic == FILE_MAGIC {
        Some(FileHeader::read(&mut &buf[..])?)
    } else {
        None
    };
    Ok(ScannedFile {
        name: file_name(path),
        magic,
        version,
        header,
    })
}

fn more_suffix(count: usize) -> String {
    if count > 1 {
        format!(" (+{} more)", count - 1)
    } else {
        String::new()
    }
}

/// Run V1 to V8 for one camera
pub fn validate_device(files: &DeviceFiles) -> DeviceValidation {
    let mut result = DeviceValidation {
        serial: files.serial.clone(),
        ..Default::default()
    };
    if files.containers.is_empty() {
        return result;
    }

    let mut scanned: Vec<ScannedFile> = Vec::new();
    // (index into `scanned`, frame) in storage order
    let mut frames: Vec<(usize, FrameInfo)> = Vec::new();

    for (_, path) in &files.containers {
        let file = match scan_header(path) {
            Ok(file) => file,
            Err(e) => {
                result
                    .read_errors
                    .push(format!("Failed to read {}: {e}", file_name(path)));
                continue;
            }
        };
        let file_index = scanned.len();
        let mut count = 0;
        match FrameLocations::open(path) {
            Ok(locations) => {
                for location in locations {
                    match location {
                        Ok(info) => {
                            frames.push((file_index, info));
                            count += 1;
                        }
                        Err(e) => result
                            .read_errors
                            .push(format!("Failed to read {}: {e}", file.name)),
                    }
                }
            }
            Err(e) => result
                .read_errors
                .push(format!("Failed to read {}: {e}", file.name)),
        }
        result.files.push((file.name.clone(), count));
        scanned.push(file);
    }

    if scanned.is_empty() {
        return result;
    }

    let log_rows = match &files.frame_log {
        Some(path) => match read_frame_log(path) {
            Ok(rows) => {
                result.frame_log = Some((file_name(path), rows.len()));
                Some(rows)
            }
            Err(e) => {
                result
                    .read_errors
                    .push(format!("Failed to read {}: {e}", file_name(path)));
                None
            }
        },
        None => None,
    };

    let checks = &mut result.checks;

    // V1
    let bad: Vec<&str> = scanned
        .iter()
        .filter(|f| f.magic != FILE_MAGIC)
        .map(|f| f.name.as_str())
        .collect();
    checks.push(if bad.is_empty() {
        CheckResult::pass("V1", "FileHeader magic")
    } else {
        CheckResult::fail("V1", format!("FileHeader magic mismatch in: {}", bad.join(", ")))
    });

    // V2
    let bad: Vec<&str> = scanned
        .iter()
        .filter(|f| f.version != FORMAT_VERSION)
        .map(|f| f.name.as_str())
        .collect();
    checks.push(if bad.is_empty() {
        CheckResult::pass("V2", "FileHeader version")
    } else {
        CheckResult::fail("V2", format!("FileHeader version mismatch in: {}", bad.join(", ")))
    });

    // V3
    let bad_magic: Vec<&(usize, FrameInfo)> =
        frames.iter().filter(|(_, info)| info.magic != FRAME_MAGIC).collect();
    checks.push(match bad_magic.first() {
        None => CheckResult::pass("V3", format!("FrameHeader magic ({} frames checked)", frames.len())),
        Some((file_index, info)) => CheckResult::fail(
            "V3",
            format!(
                "FrameHeader magic mismatch: frame_index={} in {}{}",
                info.frame_index,
                scanned[*file_index].name,
                more_suffix(bad_magic.len())
            ),
        ),
    });

    // V4
    checks.push(match scanned.iter().find_map(|f| f.header.as_ref()) {
        None => CheckResult::fail("V4", "no readable FileHeader to derive the payload size"),
        Some(header) => {
            let expected = header.frame_size();
            let bad: Vec<&FrameInfo> = frames
                .iter()
                .map(|(_, info)| info)
                .filter(|info| info.payload_size as usize != expected)
                .collect();
            match bad.first() {
                None => CheckResult::pass(
                    "V4",
                    format!(
                        "payload_size == {expected} ({}*{}*{})",
                        header.width,
                        header.height,
                        header.pixel_format.bytes_per_pixel()
                    ),
                ),
                Some(first) => CheckResult::fail(
                    "V4",
                    format!(
                        "payload_size mismatch at frame_index={}: expected {expected}, got {}{}",
                        first.frame_index,
                        first.payload_size,
                        more_suffix(bad.len())
                    ),
                ),
            }
        }
    });

    // V5
    let gap = frames
        .iter()
        .enumerate()
        .find(|(i, (_, info))| info.frame_index != *i as u64);
    checks.push(match gap {
        None => {
            let last = frames.len() as i64 - 1;
            CheckResult::pass("V5", format!("frame_index continuous (0..{last})"))
        }
        Some((i, (_, info))) => CheckResult::fail(
            "V5",
            format!("frame_index gap at position {i} (expected {i}, got {})", info.frame_index),
        ),
    });

    // V6
    let regression = frames
        .windows(2)
        .find(|pair| pair[1].1.timestamp_ns <= pair[0].1.timestamp_ns);
    checks.push(match regression {
        None => CheckResult::pass("V6", "timestamp_ns monotonically increasing"),
        Some(pair) => CheckResult::fail(
            "V6",
            format!(
                "timestamp_ns not increasing at frame_index={}: {} <= {}",
                pair[1].1.frame_index, pair[1].1.timestamp_ns, pair[0].1.timestamp_ns
            ),
        ),
    });

    // V7, V8
    match log_rows {
        None if files.frame_log.is_none() => {
            checks.push(CheckResult::skip("V7", "CSV file not found"));
            checks.push(CheckResult::skip("V8", "CSV file not found"));
        }
        None => {
            checks.push(CheckResult::skip("V7", "CSV file unreadable"));
            checks.push(CheckResult::skip("V8", "CSV file unreadable"));
        }
        Some(rows) => {
            let (rows_len, frames_len) = (rows.len(), frames.len());
            checks.push(if rows_len == frames_len {
                CheckResult::pass("V7", format!("CSV rows ({rows_len}) == Raw frames ({frames_len})"))
            } else {
                CheckResult::fail("V7", format!("CSV rows ({rows_len}) != Raw frames ({frames_len})"))
            });

            let checked = rows.len().min(frames.len());
            let mismatch = rows
                .iter()
                .zip(&frames)
                .enumerate()
                .find(|(_, (row, (_, info)))| row.timestamp_ns != info.timestamp_ns);
            checks.push(match mismatch {
                None => CheckResult::pass(
                    "V8",
                    format!("CSV timestamps match Raw timestamps ({checked} checked)"),
                ),
                Some((i, (row, (_, info)))) => CheckResult::fail(
                    "V8",
                    format!(
                        "timestamp mismatch at frame {i}: CSV={} Raw={}",
                        row.timestamp_ns, info.timestamp_ns
                    ),
                ),
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{append_frame, container_file_name, ContainerWriter, PixelFormat};
    use crate::framelog::{frame_log_file_name, FrameLog};
    use std::fs;
    use std::io::Write;

    const W: u32 = 8;
    const H: u32 = 4;

    /// Record `count` frames for `serial` split every `per_file` frames
    fn record(dir: &Path, serial: &str, count: u64, per_file: u32, with_log: bool) {
        let mut writer = ContainerWriter::create_for(dir, serial, 1_000, W, H, PixelFormat::BayerGR8, per_file).unwrap();
        let mut log = with_log.then(|| FrameLog::create(&dir.join(frame_log_file_name(serial))).unwrap());
        for i in 0..count {
            let ts = 1_000 + i as i64 * 20_000_000;
            writer.write_frame(ts, &vec![i as u8; (W * H) as usize]).unwrap();
            if let Some(log) = log.as_mut() {
                log.append(i, ts).unwrap();
            }
        }
        writer.finish().unwrap();
        if let Some(mut log) = log {
            log.finish().unwrap();
        }
    }

    #[test]
    fn test_valid_session_passes_every_check() {
        let dir = tempfile::tempdir().unwrap();
        record(dir.path(), "A1", 25, 10, true);
        record(dir.path(), "B2", 7, 10, true);

        let validation = validate_session(dir.path()).unwrap();
        assert!(validation.is_valid(), "{validation}");
        assert_eq!(validation.devices.len(), 2);
        let a = validation.device("A1").unwrap();
        assert_eq!(a.files.len(), 3);
        assert_eq!(a.passed(), 8);
        assert_eq!(a.check("V5").unwrap().message, "frame_index continuous (0..24)");
        assert_eq!(validation.passed(), 16);

        let text = validation.to_string();
        assert!(text.contains("--- camA1 ---"));
        assert!(text.contains("  [PASS] V4: payload_size == 32 (8*4*1)"));
        assert!(text.ends_with("=== Result: 16/16 PASS (2 cameras) ==="));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        record(dir.path(), "C3", 12, 5, true);
        let first = validate_session(dir.path()).unwrap();
        let second = validate_session(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_log_skips_v7_v8() {
        let dir = tempfile::tempdir().unwrap();
        record(dir.path(), "D4", 5, 100, false);
        let validation = validate_session(dir.path()).unwrap();
        let device = validation.device("D4").unwrap();
        assert!(validation.is_valid());
        assert_eq!(device.passed(), 6);
        assert_eq!(device.check("V7").unwrap().status, CheckStatus::Skip);
        assert_eq!(device.check("V8").unwrap().status, CheckStatus::Skip);
        assert!(validation.to_string().contains("  [SKIP] V7: CSV file not found"));
    }

    #[test]
    fn test_index_gap_and_timestamp_regression() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(container_file_name("E5", 0));
        let mut buf = Vec::new();
        FileHeader::new("E5", 0, W, H, PixelFormat::BayerGR8)
            .unwrap()
            .write(&mut buf)
            .unwrap();
        let payload = vec![0u8; (W * H) as usize];
        append_frame(&mut buf, 0, 100, &payload).unwrap();
        append_frame(&mut buf, 1, 200, &payload).unwrap();
        append_frame(&mut buf, 3, 150, &payload).unwrap();
        fs::write(&path, buf).unwrap();

        let validation = validate_session(dir.path()).unwrap();
        let device = validation.device("E5").unwrap();
        assert_eq!(device.check("V5").unwrap().status, CheckStatus::Fail);
        assert_eq!(
            device.check("V5").unwrap().message,
            "frame_index gap at position 2 (expected 2, got 3)"
        );
        assert_eq!(device.check("V6").unwrap().status, CheckStatus::Fail);
        assert_eq!(device.failed(), 2);
        assert!(!validation.is_valid());
        assert!(validation.to_string().contains(", 2 FAIL (1 cameras) ==="));
    }

    #[test]
    fn test_bad_payload_size_and_frame_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(container_file_name("F6", 0));
        let mut buf = Vec::new();
        FileHeader::new("F6", 0, W, H, PixelFormat::BayerGR8)
            .unwrap()
            .write(&mut buf)
            .unwrap();
        append_frame(&mut buf, 0, 100, &vec![0u8; 32]).unwrap();
        let second = buf.len();
        append_frame(&mut buf, 1, 200, &vec![0u8; 16]).unwrap();
        buf[second..second + 4].copy_from_slice(b"JUNK");
        fs::write(&path, buf).unwrap();

        let validation = validate_session(dir.path()).unwrap();
        let device = validation.device("F6").unwrap();
        assert_eq!(device.check("V3").unwrap().status, CheckStatus::Fail);
        assert!(device.check("V3").unwrap().message.contains("frame_index=1 in camF6_000000.raw"));
        assert_eq!(
            device.check("V4").unwrap().message,
            "payload_size mismatch at frame_index=1: expected 32, got 16"
        );
    }

    #[test]
    fn test_bad_file_magic_and_version() {
        let dir = tempfile::tempdir().unwrap();
        record(dir.path(), "G7", 4, 2, false);
        let second = dir.path().join(container_file_name("G7", 2));
        let mut bytes = fs::read(&second).unwrap();
        bytes[0..4].copy_from_slice(b"XRAW");
        bytes[4] = 9;
        fs::write(&second, bytes).unwrap();

        let validation = validate_session(dir.path()).unwrap();
        let device = validation.device("G7").unwrap();
        assert_eq!(
            device.check("V1").unwrap().message,
            "FileHeader magic mismatch in: camG7_000002.raw"
        );
        assert_eq!(device.check("V2").unwrap().status, CheckStatus::Fail);
        // Frames of the damaged file are still scanned
        assert_eq!(device.check("V5").unwrap().status, CheckStatus::Pass);
    }

    #[test]
    fn test_log_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        record(dir.path(), "H8", 5, 100, false);
        let mut log = fs::File::create(dir.path().join("camH8.csv")).unwrap();
        writeln!(log, "frame_number,device_timestamp_ns").unwrap();
        writeln!(log, "00000,1000").unwrap();
        writeln!(log, "00001,999").unwrap();
        drop(log);

        let validation = validate_session(dir.path()).unwrap();
        let device = validation.device("H8").unwrap();
        assert_eq!(device.check("V7").unwrap().message, "CSV rows (2) != Raw frames (5)");
        assert_eq!(
            device.check("V8").unwrap().message,
            "timestamp mismatch at frame 1: CSV=999 Raw=20001000"
        );
    }

    #[test]
    fn test_truncated_file_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        record(dir.path(), "J9", 3, 100, true);
        let path = dir.path().join(container_file_name("J9", 0));
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let validation = validate_session(dir.path()).unwrap();
        let device = validation.device("J9").unwrap();
        assert_eq!(device.read_errors.len(), 1);
        assert_eq!(device.files[0].1, 2);
        assert!(!validation.is_valid());
    }

    #[test]
    fn test_log_only_camera_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("camK1.csv"), "frame_number,device_timestamp_ns\n").unwrap();
        let validation = validate_session(dir.path()).unwrap();
        assert!(validation.is_valid());
        assert_eq!(validation.passed(), 0);
        assert!(validation.to_string().contains("  [SKIP] No raw files found"));
    }

    #[test]
    fn test_empty_and_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_session(dir.path()),
            Err(ToolkitError::NoSessionFiles(_))
        ));
        assert!(matches!(
            validate_session(&dir.path().join("nope")),
            Err(ToolkitError::NotFound(_))
        ));
    }
}
