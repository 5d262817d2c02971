//! Bootloader status report parsing.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::protocol::constants::*;

/// Error codes reported in the status `lastError` byte.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceError {
    #[error("no error")]
    NoError = 0,
    #[error("not initialized")]
    NotInitialized = 1,
    #[error("sector out of range")]
    SectorOutOfRange = 2,
    #[error("offset out of range")]
    OffsetOutOfRange = 3,
    #[error("null pointer")]
    NullPointer = 4,
    #[error("device timeout")]
    Timeout = 5,
    #[error("unknown error")]
    UnknownError = 6,
    #[error("no recent image")]
    NoRecentImage = 7,
    #[error("access violation")]
    AccessViolation = 8,
    #[error("protection violation")]
    ProtectionViolation = 9,
    #[error("misaligned address")]
    MisalignedAddress = 10,
    #[error("command unknown")]
    CommandUnknown = 11,
    #[error("checksum mismatch")]
    ChecksumMismatch = 12,
}

impl DeviceError {
    pub fn from_code(code: u8) -> Option<Self> {
        use DeviceError::*;
        Some(match code {
            0 => NoError,
            1 => NotInitialized,
            2 => SectorOutOfRange,
            3 => OffsetOutOfRange,
            4 => NullPointer,
            5 => Timeout,
            6 => UnknownError,
            7 => NoRecentImage,
            8 => AccessViolation,
            9 => ProtectionViolation,
            10 => MisalignedAddress,
            11 => CommandUnknown,
            12 => ChecksumMismatch,
            _ => return None,
        })
    }
}

/// Firmware mode decoded from the status sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Image,
    Bootloader,
    Invalid,
}

impl Mode {
    /// Classify a sentinel against every encoding the protocol has used.
    pub fn from_sentinel(sentinel: u16) -> Self {
        if BOOTLOADER_SENTINELS.contains(&sentinel) {
            Mode::Bootloader
        } else if IMAGE_SENTINELS.contains(&sentinel) {
            Mode::Image
        } else {
            Mode::Invalid
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Image => write!(f, "IMAGE"),
            Mode::Bootloader => write!(f, "BOOTLOADER"),
            Mode::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Timing hints reported by protocol version 8 and later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingHints {
    pub atomic_write_size: u8,
    /// Page write delay unit.
    pub write_delay: u8,
    /// Per-kilobyte region format delay in milliseconds.
    pub format_delay: u8,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StatusError {
    #[error("Status report too short: expected {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Parsed bootloader status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderStatus {
    pub sentinel: u16,
    pub mode: Mode,
    pub version: u8,
    pub last_error: u8,
    pub flags: u8,
    pub timing: Option<TimingHints>,
    /// Echoed read-memory address.
    pub mem_address: u32,
    /// Device-reported byte count of `data`.
    pub num_bytes: u16,
    pub data: Vec<u8>,
    pub checksum: u16,
}

impl BootloaderStatus {
    /// Bytes before the data field: length, id, sentinel, version, error, flags.
    const BASE_LEN: usize = 8;

    /// Parse a raw status report starting at its length field.
    pub fn parse(raw: &[u8]) -> Result<Self, StatusError> {
        let too_short = |expected: usize| StatusError::TooShort {
            expected,
            actual: raw.len(),
        };
        if raw.len() < Self::BASE_LEN {
            return Err(too_short(Self::BASE_LEN));
        }

        let mut c = Cursor::new(raw);
        c.set_position(3);
        let sentinel = c.read_u16::<LittleEndian>().map_err(|_| too_short(5))?;
        let version = c.read_u8().map_err(|_| too_short(6))?;
        let last_error = c.read_u8().map_err(|_| too_short(7))?;
        let flags = c.read_u8().map_err(|_| too_short(8))?;

        let (timing, data_start, max_data) = if version >= VERSION_TIMING_HINTS {
            let hints = TimingHints {
                atomic_write_size: c.read_u8().map_err(|_| too_short(17))?,
                write_delay: c.read_u8().map_err(|_| too_short(17))?,
                format_delay: c.read_u8().map_err(|_| too_short(17))?,
            };
            (Some(hints), 17usize, MAX_READ_PAYLOAD)
        } else {
            (None, 14usize, MAX_READ_PAYLOAD + 3)
        };
        let mem_address = c.read_u32::<LittleEndian>().map_err(|_| too_short(data_start))?;
        let num_bytes = c.read_u16::<LittleEndian>().map_err(|_| too_short(data_start))?;

        let n = (num_bytes as usize).min(max_data);
        let data_end = data_start + n;
        if raw.len() < data_end + 2 {
            return Err(too_short(data_end + 2));
        }
        let data = raw[data_start..data_end].to_vec();
        let checksum = u16::from_le_bytes([raw[data_end], raw[data_end + 1]]);

        Ok(Self {
            sentinel,
            mode: Mode::from_sentinel(sentinel),
            version,
            last_error,
            flags,
            timing,
            mem_address,
            num_bytes,
            data,
            checksum,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.flags & STATUS_FLAG_BUSY != 0
    }

    pub fn is_image_valid(&self) -> bool {
        self.flags & STATUS_FLAG_VALID_IMAGE != 0
    }

    pub fn has_error(&self) -> bool {
        self.last_error != DeviceError::NoError as u8
    }

    /// Decoded `last_error`, `None` when there is no error.
    pub fn error(&self) -> Option<DeviceError> {
        match DeviceError::from_code(self.last_error) {
            Some(DeviceError::NoError) => None,
            Some(e) => Some(e),
            None => Some(DeviceError::UnknownError),
        }
    }
}
