//! Sequential frame scanning and session discovery

use super::{ContainerError, FrameHeader, FILE_HEADER_LEN, FRAME_HEADER_LEN};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Location and header of one stored frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Magic as found, not checked
    pub magic: [u8; 4],
    pub frame_index: u64,
    pub timestamp_ns: i64,
    pub payload_size: u32,
    /// File offset of the frame header
    pub offset: u64,
}

impl FrameInfo {
    /// File offset of the payload
    pub fn payload_offset(&self) -> u64 {
        self.offset + FRAME_HEADER_LEN as u64
    }
}

/// Iterator over the frames of one container file
///
/// Payloads are skipped with a seek. A frame whose header or payload runs past
/// the end of the file yields [`ContainerError::Truncated`] and ends the scan.
pub struct FrameLocations<R> {
    reader: R,
    position: u64,
    len: u64,
    done: bool,
}

impl<R: Read + Seek> FrameLocations<R> {
    /// Start scanning right after the file header
    pub fn new(mut reader: R) -> Result<Self, ContainerError> {
        let len = reader.seek(SeekFrom::End(0))?;
        let position = FILE_HEADER_LEN as u64;
        reader.seek(SeekFrom::Start(position))?;
        Ok(Self {
            reader,
            position,
            len,
            done: false,
        })
    }

    fn next_frame(&mut self) -> Result<Option<FrameInfo>, ContainerError> {
        let remaining = self.len.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < FRAME_HEADER_LEN as u64 {
            return Err(ContainerError::Truncated {
                offset: self.position,
                needed: FRAME_HEADER_LEN as u64,
                available: remaining,
            });
        }

        let mut buf = [0u8; FRAME_HEADER_LEN];
        self.reader.read_exact(&mut buf)?;
        let (magic, header) = FrameHeader::parse(&buf);

        let needed = FRAME_HEADER_LEN as u64 + u64::from(header.payload_size);
        if needed > remaining {
            return Err(ContainerError::Truncated {
                offset: self.position,
                needed,
                available: remaining,
            });
        }

        let info = FrameInfo {
            magic,
            frame_index: header.frame_index,
            timestamp_ns: header.timestamp_ns,
            payload_size: header.payload_size,
            offset: self.position,
        };
        self.position += needed;
        self.reader.seek(SeekFrom::Start(self.position))?;
        Ok(Some(info))
    }
}

impl FrameLocations<fs::File> {
    pub fn open(path: &Path) -> Result<Self, ContainerError> {
        Self::new(fs::File::open(path)?)
    }
}

impl<R: Read + Seek> Iterator for FrameLocations<R> {
    type Item = Result<FrameInfo, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(Some(info)) => Some(Ok(info)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read the payload of a frame found by [`FrameLocations`]
pub fn read_frame_payload<R: Read + Seek>(
    reader: &mut R,
    info: &FrameInfo,
) -> Result<Vec<u8>, ContainerError> {
    reader.seek(SeekFrom::Start(info.payload_offset()))?;
    let mut payload = vec![0u8; info.payload_size as usize];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            ContainerError::Truncated {
                offset: info.offset,
                needed: FRAME_HEADER_LEN as u64 + u64::from(info.payload_size),
                available: 0,
            }
        } else {
            ContainerError::Io(e)
        }
    })?;
    Ok(payload)
}

/// Stored files of one camera in a session directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFiles {
    pub serial: String,
    /// Container files as (first frame index, path), ascending
    pub containers: Vec<(u64, PathBuf)>,
    /// `cam{serial}.csv`, when present
    pub frame_log: Option<PathBuf>,
}

/// Group a session directory's files by camera serial
///
/// Recognizes `cam{serial}_{n}.raw` and `cam{serial}.csv`. Cameras are
/// returned sorted by serial.
pub fn discover_session(dir: &Path) -> Result<Vec<DeviceFiles>, ContainerError> {
    let mut devices: BTreeMap<String, DeviceFiles> = BTreeMap::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix("cam") else {
            continue;
        };

        if let Some(stem) = rest.strip_suffix(".raw") {
            let Some((serial, first)) = stem.rsplit_once('_') else {
                continue;
            };
            let Ok(first) = first.parse::<u64>() else {
                continue;
            };
            device_entry(&mut devices, serial)
                .containers
                .push((first, path.clone()));
        } else if let Some(serial) = rest.strip_suffix(".csv") {
            device_entry(&mut devices, serial).frame_log = Some(path.clone());
        }
    }

    let mut devices: Vec<DeviceFiles> = devices.into_values().collect();
    for device in &mut devices {
        device.containers.sort();
    }
    Ok(devices)
}

fn device_entry<'a>(devices: &'a mut BTreeMap<String, DeviceFiles>, serial: &str) -> &'a mut DeviceFiles {
    devices
        .entry(serial.to_string())
        .or_insert_with(|| DeviceFiles {
            serial: serial.to_string(),
            ..Default::default()
        })
}
