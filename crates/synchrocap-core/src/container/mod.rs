//! SRAW raw frame container
//!
//! ## File Format
//!
//! All integers are little-endian.
//!
//! File header, 40 bytes:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | magic `SRAW` |
//! | 4 | 4 | u32 version (1) |
//! | 8 | 16 | serial, ASCII, NUL padded |
//! | 24 | 8 | i64 session start, device clock ns |
//! | 32 | 2 | u16 width |
//! | 34 | 2 | u16 height |
//! | 36 | 2 | u16 pixel format |
//! | 38 | 2 | reserved, 0 |
//!
//! Followed by frame records, each a 24 byte header and its payload:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | magic `FRAM` |
//! | 4 | 4 | u32 payload size |
//! | 8 | 8 | u64 frame index |
//! | 16 | 8 | i64 timestamp ns |
//!
//! A camera's recording is split into `cam{serial}_{first_index:06}.raw`
//! files every N frames. Frame indices keep counting across files.

mod reader;
mod writer;

pub use reader::{discover_session, read_frame_payload, DeviceFiles, FrameInfo, FrameLocations};
pub use writer::{append_frame, ContainerWriter};

use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

pub const FILE_MAGIC: [u8; 4] = *b"SRAW";
pub const FRAME_MAGIC: [u8; 4] = *b"FRAM";
pub const FORMAT_VERSION: u32 = 1;
pub const FILE_HEADER_LEN: usize = 40;
pub const FRAME_HEADER_LEN: usize = 24;

/// Bytes reserved for the serial, including at least one NUL
const SERIAL_FIELD_LEN: usize = 16;

/// Errors from reading or writing container files
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Bad magic {found:?}, expected {expected:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("Unknown pixel format code {0}")]
    UnknownPixelFormat(u16),

    #[error("Frame at offset {offset} truncated: needs {needed} bytes, {available} available")]
    Truncated {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("Payload size {actual} does not match expected {expected}")]
    PayloadSize { expected: usize, actual: usize },

    #[error("Frame dimensions {width}x{height} do not fit the header")]
    Dimensions { width: u32, height: u32 },
}

/// Pixel encoding of the stored payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    BayerGR8,
    BayerGR16,
    Bgr8,
}

impl PixelFormat {
    pub fn code(self) -> u16 {
        match self {
            Self::BayerGR8 => 0,
            Self::BayerGR16 => 1,
            Self::Bgr8 => 2,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, ContainerError> {
        match code {
            0 => Ok(Self::BayerGR8),
            1 => Ok(Self::BayerGR16),
            2 => Ok(Self::Bgr8),
            other => Err(ContainerError::UnknownPixelFormat(other)),
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::BayerGR8 => 1,
            Self::BayerGR16 => 2,
            Self::Bgr8 => 3,
        }
    }

    /// GenICam name of the format
    pub fn name(self) -> &'static str {
        match self {
            Self::BayerGR8 => "BayerGR8",
            Self::BayerGR16 => "BayerGR16",
            Self::Bgr8 => "BGR8",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Header at the start of every container file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub serial: String,
    /// Scheduled session start on the device clock
    pub start_timestamp_ns: i64,
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
}

impl FileHeader {
    pub fn new(
        serial: &str,
        start_timestamp_ns: i64,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> Result<Self, ContainerError> {
        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(ContainerError::Dimensions { width, height });
        };
        Ok(Self {
            version: FORMAT_VERSION,
            serial: serial.to_string(),
            start_timestamp_ns,
            width: w,
            height: h,
            pixel_format,
        })
    }

    /// Expected payload size of every frame in this file
    pub fn frame_size(&self) -> usize {
        usize::from(self.width) * usize::from(self.height) * self.pixel_format.bytes_per_pixel()
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_LEN] {
        let mut buf = [0u8; FILE_HEADER_LEN];
        buf[0..4].copy_from_slice(&FILE_MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..24].copy_from_slice(&encode_serial(&self.serial));
        buf[24..32].copy_from_slice(&self.start_timestamp_ns.to_le_bytes());
        buf[32..34].copy_from_slice(&self.width.to_le_bytes());
        buf[34..36].copy_from_slice(&self.height.to_le_bytes());
        buf[36..38].copy_from_slice(&self.pixel_format.code().to_le_bytes());
        buf
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Read and check the magic; the version is returned as found
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, ContainerError> {
        let mut buf = [0u8; FILE_HEADER_LEN];
        reader.read_exact(&mut buf)?;

        let magic = take4(&buf, 0);
        if magic != FILE_MAGIC {
            return Err(ContainerError::BadMagic {
                expected: FILE_MAGIC,
                found: magic,
            });
        }

        let serial_field = &buf[8..24];
        let end = serial_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SERIAL_FIELD_LEN);

        Ok(Self {
            version: u32::from_le_bytes(take4(&buf, 4)),
            serial: String::from_utf8_lossy(&serial_field[..end]).into_owned(),
            start_timestamp_ns: i64::from_le_bytes(take8(&buf, 24)),
            width: u16::from_le_bytes([buf[32], buf[33]]),
            height: u16::from_le_bytes([buf[34], buf[35]]),
            pixel_format: PixelFormat::from_code(u16::from_le_bytes([buf[36], buf[37]]))?,
        })
    }

    /// Read the header of the file at `path`
    pub fn read_path(path: &Path) -> Result<Self, ContainerError> {
        let mut file = std::fs::File::open(path)?;
        Self::read(&mut file)
    }
}

/// Header in front of every frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_size: u32,
    pub frame_index: u64,
    pub timestamp_ns: i64,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..4].copy_from_slice(&FRAME_MAGIC);
        buf[4..8].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.frame_index.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Parse a header without checking its magic
    pub(crate) fn parse(buf: &[u8; FRAME_HEADER_LEN]) -> ([u8; 4], Self) {
        (
            take4(buf, 0),
            Self {
                payload_size: u32::from_le_bytes(take4(buf, 4)),
                frame_index: u64::from_le_bytes(take8(buf, 8)),
                timestamp_ns: i64::from_le_bytes(take8(buf, 16)),
            },
        )
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self, ContainerError> {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut buf)?;
        let (magic, header) = Self::parse(&buf);
        if magic != FRAME_MAGIC {
            return Err(ContainerError::BadMagic {
                expected: FRAME_MAGIC,
                found: magic,
            });
        }
        Ok(header)
    }
}

/// `cam{serial}_{first_index:06}.raw`
pub fn container_file_name(serial: &str, first_index: u64) -> String {
    format!("cam{serial}_{first_index:06}.raw")
}

fn encode_serial(serial: &str) -> [u8; SERIAL_FIELD_LEN] {
    let mut field = [0u8; SERIAL_FIELD_LEN];
    let ascii = serial
        .bytes()
        .map(|b| if b.is_ascii() { b } else { b'?' })
        .take(SERIAL_FIELD_LEN - 1);
    for (slot, b) in field.iter_mut().zip(ascii) {
        *slot = b;
    }
    field
}

fn take4(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}

fn take8(buf: &[u8], at: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[at..at + 8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_file_header_layout() {
        let header = FileHeader::new("12345678", -42, 1920, 1080, PixelFormat::BayerGR8).unwrap();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"SRAW");
        assert_eq!(u32::from_le_bytes(take4(&bytes, 4)), 1);
        assert_eq!(&bytes[8..16], b"12345678");
        assert!(bytes[16..24].iter().all(|&b| b == 0));
        assert_eq!(i64::from_le_bytes(take8(&bytes, 24)), -42);
        assert_eq!(u16::from_le_bytes([bytes[32], bytes[33]]), 1920);
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 1080);
        assert_eq!(&bytes[36..40], &[0, 0, 0, 0]);

        let parsed = FileHeader::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.frame_size(), 1920 * 1080);
    }

    #[test]
    fn test_long_serial_truncated() {
        let header =
            FileHeader::new("ABCDEFGHIJKLMNOPQRST", 0, 8, 8, PixelFormat::BayerGR8).unwrap();
        let parsed = FileHeader::read(&mut Cursor::new(header.to_bytes())).unwrap();
        assert_eq!(parsed.serial, "ABCDEFGHIJKLMNO");
    }

    #[test]
    fn test_file_header_bad_magic() {
        let mut bytes = FileHeader::new("X", 0, 8, 8, PixelFormat::BayerGR8)
            .unwrap()
            .to_bytes();
        bytes[0] = b'Q';
        let err = FileHeader::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ContainerError::BadMagic { .. }));
    }

    #[test]
    fn test_frame_header_layout() {
        let header = FrameHeader {
            payload_size: 3072,
            frame_index: 7,
            timestamp_ns: 1_700_000_000_000_000_000,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"FRAM");
        assert_eq!(FrameHeader::read(&mut Cursor::new(bytes)).unwrap(), header);
    }

    #[test]
    fn test_pixel_format_codes() {
        for format in [PixelFormat::BayerGR8, PixelFormat::BayerGR16, PixelFormat::Bgr8] {
            assert_eq!(PixelFormat::from_code(format.code()).unwrap(), format);
        }
        assert_eq!(PixelFormat::BayerGR16.bytes_per_pixel(), 2);
        assert!(PixelFormat::from_code(9).is_err());
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        assert!(FileHeader::new("X", 0, 70_000, 10, PixelFormat::BayerGR8).is_err());
    }

    #[test]
    fn test_container_file_name() {
        assert_eq!(container_file_name("123", 2000), "cam123_002000.raw");
    }
}
