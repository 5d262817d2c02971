//! Bootloader command encoding.
//!
//! Every command travels as feature report 7: one command byte, its
//! parameters, then `BOOTLOADER_PAD` filler up to [`COMMAND_PAYLOAD_LEN`].

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::checksum::{fletcher16, fletcher16_continue};
use crate::protocol::constants::*;

/// Bytes following the report id in a bootloader report.
pub const COMMAND_PAYLOAD_LEN: usize = BOOTLOADER_REPORT_LEN - 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("{command} payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        command: &'static str,
        len: usize,
        max: usize,
    },
}

/// Addressing parameters of the format-image command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatImageParams {
    pub image_type: u8,
    pub region_count: u8,
    pub entry_point: u32,
    pub descriptor_address: u16,
    pub bus_address: u8,
    pub report_id: u8,
}

impl FormatImageParams {
    /// Version 9 and later describe themselves; older parts need the
    /// descriptor register and bus address spelled out.
    pub fn for_version(
        version: u8,
        entry_point: u32,
        legacy_descriptor_address: u16,
        legacy_bus_address: u8,
    ) -> Self {
        let (descriptor_address, bus_address) = if version >= VERSION_SELF_DESCRIBING {
            (SELF_DESCRIBING_DESCRIPTOR, SELF_DESCRIBING_ADDRESS)
        } else {
            (legacy_descriptor_address, legacy_bus_address)
        };
        Self {
            image_type: 0,
            region_count: 1,
            entry_point,
            descriptor_address,
            bus_address,
            report_id: REPORT_ID_BOOTLOADER,
        }
    }
}

/// A single bootloader command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootCommand<'a> {
    Write { address: u32, data: &'a [u8] },
    Flush,
    Validate { image_type: u8 },
    Reset,
    FormatImage(FormatImageParams),
    FormatRegion {
        region: u8,
        offset: u32,
        size: u32,
        checksum: u32,
    },
    InvokeBootloader,
    WriteMemory { address: u32, data: &'a [u8] },
    ReadMemory { address: u32, count: u16 },
}

impl BootCommand<'_> {
    pub fn code(&self) -> u8 {
        match self {
            BootCommand::Write { .. } => BL_CMD_WRITE,
            BootCommand::Flush => BL_CMD_FLUSH,
            BootCommand::Validate { .. } => BL_CMD_VALIDATE,
            BootCommand::Reset => BL_CMD_RESET,
            BootCommand::FormatImage(_) => BL_CMD_FORMAT_IMAGE,
            BootCommand::FormatRegion { .. } => BL_CMD_FORMAT_REGION,
            BootCommand::InvokeBootloader => BL_CMD_INVOKE_BOOTLOADER,
            BootCommand::WriteMemory { .. } => BL_CMD_WRITE_MEMORY,
            BootCommand::ReadMemory { .. } => BL_CMD_READ_MEMORY,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BootCommand::Write { .. } => "WRITE",
            BootCommand::Flush => "FLUSH",
            BootCommand::Validate { .. } => "VALIDATE",
            BootCommand::Reset => "RESET",
            BootCommand::FormatImage(_) => "FORMAT_IMAGE",
            BootCommand::FormatRegion { .. } => "FORMAT_REGION",
            BootCommand::InvokeBootloader => "INVOKE_BOOTLOADER",
            BootCommand::WriteMemory { .. } => "WRITE_MEMORY",
            BootCommand::ReadMemory { .. } => "READ_MEMORY",
        }
    }

    /// Encode to the padded report payload that follows the report id.
    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let code = self.code();
        let mut out = Vec::with_capacity(COMMAND_PAYLOAD_LEN);
        out.push(code);

        match *self {
            BootCommand::Write { address, data } | BootCommand::WriteMemory { address, data } => {
                if data.len() > MAX_WRITE_PAYLOAD {
                    return Err(CommandError::PayloadTooLarge {
                        command: self.name(),
                        len: data.len(),
                        max: MAX_WRITE_PAYLOAD,
                    });
                }
                let mut preamble = [0u8; 7];
                preamble[0] = code;
                LittleEndian::write_u32(&mut preamble[1..5], address);
                LittleEndian::write_u16(&mut preamble[5..7], data.len() as u16);
                let checksum = fletcher16_continue(data, fletcher16(&preamble));

                out.extend_from_slice(&preamble[1..]);
                out.extend_from_slice(data);
                out.extend_from_slice(&checksum.to_le_bytes());
            }
            BootCommand::Validate { image_type } => out.push(image_type),
            BootCommand::FormatImage(p) => {
                out.push(p.image_type);
                out.push(p.region_count);
                out.extend_from_slice(&p.entry_point.to_le_bytes());
                out.extend_from_slice(&p.descriptor_address.to_le_bytes());
                out.push(p.bus_address);
                out.push(p.report_id);
            }
            BootCommand::FormatRegion {
                region,
                offset,
                size,
                checksum,
            } => {
                out.push(region);
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&checksum.to_le_bytes());
            }
            BootCommand::ReadMemory { address, count } => {
                if count as usize > MAX_READ_PAYLOAD {
                    return Err(CommandError::PayloadTooLarge {
                        command: self.name(),
                        len: count as usize,
                        max: MAX_READ_PAYLOAD,
                    });
                }
                out.extend_from_slice(&address.to_le_bytes());
                out.extend_from_slice(&count.to_le_bytes());
            }
            BootCommand::Flush | BootCommand::Reset | BootCommand::InvokeBootloader => {}
        }

        out.resize(COMMAND_PAYLOAD_LEN, BOOTLOADER_PAD);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands_are_padded() {
        for cmd in [BootCommand::Flush, BootCommand::Reset, BootCommand::InvokeBootloader] {
            let payload = cmd.encode().unwrap();
            assert_eq!(payload.len(), COMMAND_PAYLOAD_LEN);
            assert_eq!(payload[0], cmd.code());
            assert!(payload[1..].iter().all(|&b| b == BOOTLOADER_PAD));
        }
    }

    #[test]
    fn test_write_chunk_layout() {
        let data = [0xAAu8; MAX_WRITE_PAYLOAD];
        let payload = BootCommand::Write {
            address: 0x0002_D420,
            data: &data,
        }
        .encode()
        .unwrap();

        assert_eq!(payload.len(), COMMAND_PAYLOAD_LEN);
        assert_eq!(payload[0], BL_CMD_WRITE);
        assert_eq!(LittleEndian::read_u32(&payload[1..5]), 0x0002_D420);
        assert_eq!(LittleEndian::read_u16(&payload[5..7]) as usize, MAX_WRITE_PAYLOAD);
        assert_eq!(&payload[7..7 + MAX_WRITE_PAYLOAD], &data[..]);

        let tail = 7 + MAX_WRITE_PAYLOAD;
        let checksum = LittleEndian::read_u16(&payload[tail..tail + 2]);
        let mut whole = payload[..7].to_vec();
        whole.extend_from_slice(&data);
        assert_eq!(checksum, fletcher16(&whole));
        assert_eq!(payload[tail + 2], BOOTLOADER_PAD);
    }

    #[test]
    fn test_write_rejects_oversized_chunk() {
        let data = [0u8; MAX_WRITE_PAYLOAD + 1];
        let err = BootCommand::Write { address: 0, data: &data }.encode().unwrap_err();
        assert!(matches!(err, CommandError::PayloadTooLarge { max: MAX_WRITE_PAYLOAD, .. }));
    }

    #[test]
    fn test_format_image_addressing() {
        let modern = FormatImageParams::for_version(9, 0x2000, 0x0020, 0x2C);
        assert_eq!(modern.descriptor_address, 0xFFFF);
        assert_eq!(modern.bus_address, 0xFF);

        let legacy = FormatImageParams::for_version(7, 0x2000, 0x0020, 0x2C);
        assert_eq!(legacy.descriptor_address, 0x0020);
        assert_eq!(legacy.bus_address, 0x2C);

        let payload = BootCommand::FormatImage(modern).encode().unwrap();
        assert_eq!(
            &payload[..11],
            &[BL_CMD_FORMAT_IMAGE, 0, 1, 0x00, 0x20, 0, 0, 0xFF, 0xFF, 0xFF, 7]
        );
        assert_eq!(payload[11], BOOTLOADER_PAD);
    }

    #[test]
    fn test_format_region_and_read_memory() {
        let payload = BootCommand::FormatRegion {
            region: 0,
            offset: 0x1000,
            size: 1040,
            checksum: 0xDEAD_BEEF,
        }
        .encode()
        .unwrap();
        assert_eq!(payload[0], BL_CMD_FORMAT_REGION);
        assert_eq!(payload[1], 0);
        assert_eq!(LittleEndian::read_u32(&payload[2..6]), 0x1000);
        assert_eq!(LittleEndian::read_u32(&payload[6..10]), 1040);
        assert_eq!(LittleEndian::read_u32(&payload[10..14]), 0xDEAD_BEEF);

        let payload = BootCommand::ReadMemory {
            address: 0x2000_0808,
            count: 29,
        }
        .encode()
        .unwrap();
        assert_eq!(&payload[..7], &[BL_CMD_READ_MEMORY, 0x08, 0x08, 0x00, 0x20, 29, 0]);

        assert!(
            BootCommand::ReadMemory {
                address: 0,
                count: MAX_READ_PAYLOAD as u16 + 1
            }
            .encode()
            .is_err()
        );
    }
}
