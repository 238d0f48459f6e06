//! Single-frame RGB preview of BayerGR8 containers
//!
//! Demosaicing works per 2x2 GRBG cell:
//!
//! ```text
//! G R
//! B G
//! ```
//!
//! All four pixels of a cell get `(R, (G1 + G2) / 2, B)`. Odd trailing
//! rows and columns reuse the nearest full cell.

use super::ToolkitError;
use crate::container::{read_frame_payload, FileHeader, FrameInfo, FrameLocations, PixelFormat};
use std::fs::File;
use std::path::{Path, PathBuf};

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub header: FileHeader,
    pub frame: FrameInfo,
    /// Position of the frame within its file
    pub position: usize,
    /// Packed RGB8, `width * height * 3` bytes
    pub rgb: Vec<u8>,
}

impl Preview {
    pub fn width(&self) -> u32 {
        u32::from(self.header.width)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.header.height)
    }

    /// `{stem}_frame{index:06}.png` next to `source`
    pub fn default_png_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        source.with_file_name(format!("{stem}_frame{:06}.png", self.frame.frame_index))
    }
}

/// Convert a BayerGR8 payload to packed RGB8
pub fn debayer_grbg8(payload: &[u8], width: usize, height: usize) -> Result<Vec<u8>, ToolkitError> {
    if payload.len() != width * height {
        return Err(ToolkitError::InvalidArgument(format!(
            "payload of {} bytes does not match {width}x{height}",
            payload.len()
        )));
    }
    let mut rgb = vec![0u8; width * height * 3];
    if width < 2 || height < 2 {
        // No complete cell: grey
        for (dst, &v) in rgb.chunks_exact_mut(3).zip(payload) {
            dst.fill(v);
        }
        return Ok(rgb);
    }

    let at = |x: usize, y: usize| payload[y * width + x];
    for y in 0..height {
        let cy = (y & !1).min(height - 2);
        for x in 0..width {
            let cx = (x & !1).min(width - 2);
            let g1 = u16::from(at(cx, cy));
            let r = at(cx + 1, cy);
            let b = at(cx, cy + 1);
            let g2 = u16::from(at(cx + 1, cy + 1));

            let i = (y * width + x) * 3;
            rgb[i] = r;
            rgb[i + 1] = ((g1 + g2) / 2) as u8;
            rgb[i + 2] = b;
        }
    }
    Ok(rgb)
}

/// Decode the frame at `position` of container file `path`
///
/// # Errors
///
/// [`ToolkitError::UnsupportedPixelFormat`] for anything but BayerGR8 and
/// [`ToolkitError::FrameOutOfRange`] past the last frame.
pub fn preview_frame(path: &Path, position: usize) -> Result<Preview, ToolkitError> {
    if !path.is_file() {
        return Err(ToolkitError::NotFound(path.to_path_buf()));
    }
    let header = FileHeader::read_path(path)?;
    if header.pixel_format != PixelFormat::BayerGR8 {
        return Err(ToolkitError::UnsupportedPixelFormat(format!(
            "{} ({})",
            header.pixel_format,
            header.pixel_format.code()
        )));
    }

    let mut available = 0;
    let mut frame = None;
    for info in FrameLocations::open(path)? {
        let info = info?;
        if available == position {
            frame = Some(info);
            break;
        }
        available += 1;
    }
    let frame = frame.ok_or(ToolkitError::FrameOutOfRange {
        requested: position,
        available,
    })?;

    let mut file = File::open(path)?;
    let payload = read_frame_payload(&mut file, &frame)?;
    let rgb = debayer_grbg8(
        &payload,
        usize::from(header.width),
        usize::from(header.height),
    )?;

    tracing::debug!(
        path = %path.display(),
        position,
        frame_index = frame.frame_index,
        "Frame decoded"
    );
    Ok(Preview {
        header,
        frame,
        position,
        rgb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerWriter;

    #[test]
    fn test_debayer_single_cell() {
        // G=100 R=200 / B=50 G=110
        let rgb = debayer_grbg8(&[100, 200, 50, 110], 2, 2).unwrap();
        assert_eq!(rgb, [200, 105, 50].repeat(4));
    }

    #[test]
    fn test_debayer_odd_edges_reuse_last_cell() {
        #[rustfmt::skip]
        let payload = [
            10, 20, 30,
            40, 50, 60,
            70, 80, 90,
        ];
        let rgb = debayer_grbg8(&payload, 3, 3).unwrap();
        // Pixel (2, 2) uses the cell at (1, 1): G=50 R=60 B=80 G=90
        assert_eq!(&rgb[8 * 3..], &[60, 70, 80]);
        // Pixel (0, 0) uses the cell at (0, 0)
        assert_eq!(&rgb[..3], &[20, 30, 40]);
    }

    #[test]
    fn test_debayer_rejects_wrong_size() {
        assert!(debayer_grbg8(&[0; 5], 2, 2).is_err());
    }

    #[test]
    fn test_preview_frame_and_png_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ContainerWriter::create_for(dir.path(), "V1", 0, 4, 2, PixelFormat::BayerGR8, 1000).unwrap();
        for i in 0..3u8 {
            writer.write_frame(i64::from(i), &[i * 10; 8]).unwrap();
        }
        writer.finish().unwrap();
        let path = writer.files()[0].clone();

        let preview = preview_frame(&path, 2).unwrap();
        assert_eq!(preview.frame.frame_index, 2);
        assert_eq!(preview.rgb.len(), 4 * 2 * 3);
        assert!(preview.rgb.iter().all(|&v| v == 20));
        assert_eq!(
            preview.default_png_path(&path),
            dir.path().join("camV1_000000_frame000002.png")
        );

        assert!(matches!(
            preview_frame(&path, 3),
            Err(ToolkitError::FrameOutOfRange { requested: 3, available: 3 })
        ));
    }

    #[test]
    fn test_preview_rejects_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ContainerWriter::create_for(dir.path(), "V2", 0, 2, 2, PixelFormat::Bgr8, 1000).unwrap();
        writer.write_frame(0, &[0; 12]).unwrap();
        writer.finish().unwrap();
        assert!(matches!(
            preview_frame(&writer.files()[0], 0),
            Err(ToolkitError::UnsupportedPixelFormat(_))
        ));
    }
}
