//! Fixed-layout structures: HID command headers, the HID descriptor and the
//! system information block.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{
    COMMAND_REGISTER, DATA_REGISTER, HID_DESCRIPTOR_LEN, MAX_INLINE_REPORT_ID, REPORT_ID_ESCAPE,
};

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HID-over-I2C command header.
///
/// Report ids up to 14 fit in the 4-bit id field; larger ids set the field to
/// `0xF` and follow the opcode byte with one explicit id byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub command_register: u16,
    pub opcode: u8,
    pub report_type: u8,
    pub report_id: u8,
}

impl CommandHeader {
    pub fn new(command_register: u16, opcode: u8, report_type: u8, report_id: u8) -> Self {
        Self {
            command_register,
            opcode,
            report_type,
            report_id,
        }
    }

    /// Encoded length: 4 bytes, or 5 when the id needs its own byte.
    pub fn encoded_len(&self) -> usize {
        if self.report_id > MAX_INLINE_REPORT_ID { 5 } else { 4 }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let [reg_lo, reg_hi] = self.command_register.to_le_bytes();
        let type_bits = (self.report_type << 4) & 0x30;
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(reg_lo);
        buf.push(reg_hi);
        if self.report_id > MAX_INLINE_REPORT_ID {
            buf.push(type_bits | REPORT_ID_ESCAPE);
            buf.push(self.opcode & 0x0F);
            buf.push(self.report_id);
        } else {
            buf.push(type_bits | (self.report_id & 0x0F));
            buf.push(self.opcode & 0x0F);
        }
        buf
    }
}

/// HID descriptor (30 bytes at register 0x0020).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidDescriptor {
    pub descriptor_length: u16,
    pub bcd_version: u16,
    pub report_descriptor_length: u16,
    pub report_descriptor_register: u16,
    pub input_register: u16,
    pub max_input_length: u16,
    pub output_register: u16,
    pub max_output_length: u16,
    pub command_register: u16,
    pub data_register: u16,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version_id: u16,
}

impl Default for HidDescriptor {
    fn default() -> Self {
        Self {
            descriptor_length: HID_DESCRIPTOR_LEN as u16,
            bcd_version: 0x0100,
            report_descriptor_length: 0,
            report_descriptor_register: 0,
            input_register: 0,
            max_input_length: 0,
            output_register: 0,
            max_output_length: 0,
            command_register: COMMAND_REGISTER,
            data_register: DATA_REGISTER,
            vendor_id: 0,
            product_id: 0,
            version_id: 0,
        }
    }
}

impl HidDescriptor {
    pub const SIZE: usize = HID_DESCRIPTOR_LEN;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut c = Cursor::new(data);
        Ok(Self {
            descriptor_length: c.read_u16::<LittleEndian>()?,
            bcd_version: c.read_u16::<LittleEndian>()?,
            report_descriptor_length: c.read_u16::<LittleEndian>()?,
            report_descriptor_register: c.read_u16::<LittleEndian>()?,
            input_register: c.read_u16::<LittleEndian>()?,
            max_input_length: c.read_u16::<LittleEndian>()?,
            output_register: c.read_u16::<LittleEndian>()?,
            max_output_length: c.read_u16::<LittleEndian>()?,
            command_register: c.read_u16::<LittleEndian>()?,
            data_register: c.read_u16::<LittleEndian>()?,
            vendor_id: c.read_u16::<LittleEndian>()?,
            product_id: c.read_u16::<LittleEndian>()?,
            version_id: c.read_u16::<LittleEndian>()?,
        })
    }
}

/// Decoded firmware revision word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareRevision {
    pub raw: u32,
}

impl FirmwareRevision {
    /// Built from a working tree with uncommitted changes.
    pub fn is_uncommitted(&self) -> bool {
        self.raw & 0x8000_0000 != 0
    }

    /// Built from a branch rather than the mainline.
    pub fn is_branch(&self) -> bool {
        self.raw & 0x4000_0000 != 0
    }

    pub fn developer_id(&self) -> u8 {
        ((self.raw >> 24) & 0x3F) as u8
    }

    pub fn revision(&self) -> u32 {
        self.raw & 0x00FF_FFFF
    }
}

/// System information block (29 bytes at 0x20000808).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemInfo {
    pub hardware_id: u8,
    pub firmware_id: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version_id: u16,
    pub firmware_revision: FirmwareRevision,
    pub read_only_config_address: u32,
    pub read_write_config_address: u32,
    pub persistent_config_address: u32,
    pub is_big_endian: bool,
}

impl SystemInfo {
    pub const SIZE: usize = 29;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut c = Cursor::new(data);
        let hardware_id = c.read_u8()?;
        let firmware_id = c.read_u8()?;
        let vendor_id = c.read_u16::<LittleEndian>()?;
        let product_id = c.read_u16::<LittleEndian>()?;
        let version_id = c.read_u16::<LittleEndian>()?;
        let firmware_revision = FirmwareRevision {
            raw: c.read_u32::<LittleEndian>()?,
        };
        let _unused = c.read_u32::<LittleEndian>()?;
        Ok(Self {
            hardware_id,
            firmware_id,
            vendor_id,
            product_id,
            version_id,
            firmware_revision,
            read_only_config_address: c.read_u32::<LittleEndian>()?,
            read_write_config_address: c.read_u32::<LittleEndian>()?,
            persistent_config_address: c.read_u32::<LittleEndian>()?,
            is_big_endian: c.read_u8()? & 0x01 != 0,
        })
    }
}
