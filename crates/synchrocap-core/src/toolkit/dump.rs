//! Header and frame listing of a single container file

use super::ToolkitError;
use crate::container::{FileHeader, FrameInfo, FrameLocations, FILE_MAGIC};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Files with more frames than this are listed as head and tail only
const FULL_LIST_LIMIT: usize = 20;
const SAMPLE_HEAD: usize = 10;
const SAMPLE_TAIL: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDump {
    pub path: PathBuf,
    pub header: FileHeader,
    pub frames: Vec<FrameInfo>,
    /// Why the scan stopped early, if it did
    pub truncated: Option<String>,
}

/// Read the header and every frame header of `path`
pub fn dump_container(path: &Path) -> Result<ContainerDump, ToolkitError> {
    if !path.is_file() {
        return Err(ToolkitError::NotFound(path.to_path_buf()));
    }
    let header = FileHeader::read_path(path)?;

    let mut frames = Vec::new();
    let mut truncated = None;
    for info in FrameLocations::open(path)? {
        match info {
            Ok(info) => frames.push(info),
            Err(e) => truncated = Some(e.to_string()),
        }
    }

    Ok(ContainerDump {
        path: path.to_path_buf(),
        header,
        frames,
        truncated,
    })
}

impl ContainerDump {
    /// Text listing, sampled unless `show_all`
    pub fn render(&self, show_all: bool) -> String {
        let h = &self.header;
        let mut out = String::new();
        let _ = writeln!(out, "=== FileHeader ===");
        let _ = writeln!(out, "  magic:              {}", String::from_utf8_lossy(&FILE_MAGIC));
        let _ = writeln!(out, "  version:            {}", h.version);
        let _ = writeln!(out, "  camera_serial:      {}", h.serial);
        let _ = writeln!(out, "  recording_start_ns: {}", h.start_timestamp_ns);
        let _ = writeln!(out, "  width:              {}", h.width);
        let _ = writeln!(out, "  height:             {}", h.height);
        let _ = writeln!(
            out,
            "  pixel_format:       {} ({})",
            h.pixel_format,
            h.pixel_format.code()
        );
        let _ = writeln!(out);

        let total = self.frames.len();
        let _ = writeln!(out, "=== Frames ({total} total) ===");
        let line = |out: &mut String, i: usize, info: &FrameInfo| {
            let _ = writeln!(
                out,
                "  [{i:>4}] frame_index={:<8}  timestamp_ns={}  payload={}",
                info.frame_index, info.timestamp_ns, info.payload_size
            );
        };

        if show_all || total <= FULL_LIST_LIMIT {
            for (i, info) in self.frames.iter().enumerate() {
                line(&mut out, i, info);
            }
        } else {
            for (i, info) in self.frames.iter().enumerate().take(SAMPLE_HEAD) {
                line(&mut out, i, info);
            }
            let _ = writeln!(
                out,
                "  ... ({} frames omitted) ...",
                total - SAMPLE_HEAD - SAMPLE_TAIL
            );
            for (i, info) in self.frames.iter().enumerate().skip(total - SAMPLE_TAIL) {
                line(&mut out, i, info);
            }
        }

        if let Some(reason) = &self.truncated {
            let _ = writeln!(out, "  WARNING: {reason}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerWriter, PixelFormat};

    fn record(dir: &Path, frames: u64) -> PathBuf {
        let mut writer = ContainerWriter::create_for(dir, "D1", 123, 2, 2, PixelFormat::BayerGR8, 1000).unwrap();
        for i in 0..frames {
            writer.write_frame(1_000 + i as i64, &[0u8; 4]).unwrap();
        }
        writer.finish().unwrap();
        writer.files()[0].clone()
    }

    #[test]
    fn test_small_file_lists_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dump_container(&record(dir.path(), 3)).unwrap();
        let text = dump.render(false);
        assert!(text.contains("  camera_serial:      D1\n"));
        assert!(text.contains("  recording_start_ns: 123\n"));
        assert!(text.contains("  pixel_format:       BayerGR8 (0)\n"));
        assert!(text.contains("=== Frames (3 total) ==="));
        assert!(text.contains("  [   2] frame_index=2         timestamp_ns=1002  payload=4\n"));
    }

    #[test]
    fn test_large_file_is_sampled() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dump_container(&record(dir.path(), 25)).unwrap();

        let text = dump.render(false);
        assert!(text.contains("  ... (5 frames omitted) ..."));
        assert!(text.contains("[   9]"));
        assert!(!text.contains("[  10]"));
        assert!(text.contains("[  15]"));

        let all = dump.render(true);
        assert!(!all.contains("omitted"));
        assert_eq!(all.matches("frame_index=").count(), 25);
    }

    #[test]
    fn test_truncated_tail_is_noted() {
        let dir = tempfile::tempdir().unwrap();
        let path = record(dir.path(), 4);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let dump = dump_container(&path).unwrap();
        assert_eq!(dump.frames.len(), 3);
        assert!(dump.render(false).contains("WARNING:"));
    }

    #[test]
    fn test_bad_magic_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camX_000000.raw");
        std::fs::write(&path, [0u8; 64]).unwrap();
        assert!(matches!(dump_container(&path), Err(ToolkitError::Container(_))));
    }
}
