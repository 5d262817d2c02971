//! Transport framing on top of a [`HostBus`].
//!
//! A `TransportFramer` owns the bus for one device. It builds the checksummed
//! extended-memory frames, the HID command headers and feature reports, and
//! caches the device's byte order after the first register access that needs
//! it.

mod hid;
mod measurement;

pub use measurement::{
    MAX_MEASUREMENT_RESULTS, MeasurementConfig, MeasurementGlobalInfo, MeasurementGroupInfo,
};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::checksum::byte_sum8;
use crate::protocol::constants::*;
use crate::protocol::header::{HeaderError, SystemInfo};
use crate::protocol::registers::{ByteOrderAssumption, Register, RegisterWidth, regs};
use crate::report::AbsoluteLayout;
use crate::transport::{BusError, HostBus};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Bad checksum: expected 0x{expected:02X}, got 0x{actual:02X}")]
    BadChecksum { expected: u8, actual: u8 },

    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Parameter out of range: {0}")]
    ParameterOutOfRange(String),

    #[error("Malformed response: {0}")]
    Malformed(#[from] HeaderError),
}

/// Which register window extended-memory accesses go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMap {
    /// Standard virtual map.
    #[default]
    Mapped,
    /// Raw physical map.
    Raw,
}

impl AddressMap {
    fn write_register(self) -> u16 {
        match self {
            AddressMap::Mapped => EXT_MEM_WRITE_MAPPED,
            AddressMap::Raw => EXT_MEM_WRITE_RAW,
        }
    }

    fn read_register(self) -> u16 {
        match self {
            AddressMap::Mapped => EXT_MEM_READ_MAPPED,
            AddressMap::Raw => EXT_MEM_READ_RAW,
        }
    }
}

/// Byte order of multi-byte values stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Per-device framing state.
pub struct TransportFramer<B: HostBus> {
    bus: B,
    address: u8,
    map: AddressMap,
    endianness: Option<Endianness>,
    command_register: u16,
    data_register: u16,
    max_report_len: usize,
    absolute_layout: AbsoluteLayout,
}

impl<B: HostBus> TransportFramer<B> {
    pub fn new(bus: B, address: u8) -> Self {
        Self {
            bus,
            address,
            map: AddressMap::Mapped,
            endianness: None,
            command_register: COMMAND_REGISTER,
            data_register: DATA_REGISTER,
            max_report_len: MAX_REPORT_LEN,
            absolute_layout: AbsoluteLayout::Cirque,
        }
    }

    pub fn with_max_report_len(mut self, len: usize) -> Self {
        self.max_report_len = len;
        self
    }

    /// Layout used when decoding absolute reports in `get_report`.
    pub fn with_absolute_layout(mut self, layout: AbsoluteLayout) -> Self {
        self.absolute_layout = layout;
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Point the framer at a different device. Drops the cached byte order.
    pub fn retarget(&mut self, address: u8) {
        debug!(from = self.address, to = address, "Retargeting framer");
        self.address = address;
        self.invalidate_endianness();
    }

    pub fn set_address_map(&mut self, map: AddressMap) {
        self.map = map;
    }

    pub fn address_map(&self) -> AddressMap {
        self.map
    }

    pub fn invalidate_endianness(&mut self) {
        self.endianness = None;
    }

    /// Cached byte order, if it has been resolved.
    pub fn cached_endianness(&self) -> Option<Endianness> {
        self.endianness
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Send one write transaction.
    fn send(&mut self, bytes: &[u8], stop: bool) -> Result<(), TransportError> {
        trace!(len = bytes.len(), stop, "TX");
        self.bus.begin_transmission(self.address);
        let written = self.bus.write(bytes)?;
        let ended = self.bus.end_transmission(stop);
        if written != bytes.len() {
            return Err(TransportError::LengthMismatch {
                expected: bytes.len(),
                actual: written,
            });
        }
        ended?;
        Ok(())
    }

    /// Request `count` bytes and collect whatever the device delivers.
    fn receive(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        let available = self.bus.request_read(self.address, count, true)?;
        let bytes = (0..available)
            .map(|_| self.bus.read())
            .collect::<Result<Vec<u8>, BusError>>()?;
        trace!(requested = count, received = bytes.len(), "RX");
        Ok(bytes)
    }

    fn check_payload_len(count: usize) -> Result<(), TransportError> {
        if count > EXT_MEM_MAX_PAYLOAD {
            return Err(TransportError::ParameterOutOfRange(format!(
                "{count} bytes exceeds extended memory limit of {EXT_MEM_MAX_PAYLOAD}"
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Extended memory
    // ------------------------------------------------------------------

    /// Write `data` at `address` in one checksummed frame.
    #[instrument(level = "debug", skip(self, data), fields(len = data.len()))]
    pub fn write_extended_memory(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        Self::check_payload_len(data.len())?;

        let mut frame = vec![0u8; EXT_MEM_HEADER_LEN];
        LittleEndian::write_u16(&mut frame[0..2], self.map.write_register());
        LittleEndian::write_u32(&mut frame[2..6], address);
        LittleEndian::write_u16(&mut frame[6..8], data.len() as u16);
        frame.extend_from_slice(data);
        frame.push(byte_sum8(&frame));

        self.send(&frame, true)
    }

    /// Read `count` bytes at `address`, verifying length and checksum.
    #[instrument(level = "debug", skip(self))]
    pub fn read_extended_memory(
        &mut self,
        address: u32,
        count: usize,
    ) -> Result<Vec<u8>, TransportError> {
        Self::check_payload_len(count)?;

        let mut command = [0u8; EXT_MEM_HEADER_LEN];
        LittleEndian::write_u16(&mut command[0..2], self.map.read_register());
        LittleEndian::write_u32(&mut command[2..6], address);
        LittleEndian::write_u16(&mut command[6..8], count as u16);
        self.send(&command, false)?;

        let expected = count + EXT_MEM_REPLY_OVERHEAD;
        let reply = self.receive(expected)?;
        if reply.len() != expected {
            return Err(TransportError::LengthMismatch {
                expected,
                actual: reply.len(),
            });
        }

        let length = LittleEndian::read_u16(&reply[0..2]) as usize;
        if length != expected {
            return Err(TransportError::LengthMismatch {
                expected,
                actual: length,
            });
        }

        let (body, tail) = reply.split_at(expected - 1);
        let computed = byte_sum8(body);
        if computed != tail[0] {
            return Err(TransportError::BadChecksum {
                expected: computed,
                actual: tail[0],
            });
        }

        Ok(body[2..].to_vec())
    }

    /// Read a contiguous range in transfers of at most `chunk` bytes.
    pub fn read_memory_chunked(
        &mut self,
        address: u32,
        len: usize,
        chunk: usize,
    ) -> Result<Vec<u8>, TransportError> {
        if chunk == 0 {
            return Err(TransportError::ParameterOutOfRange(
                "chunk size must be non-zero".into(),
            ));
        }
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let n = chunk.min(len - out.len());
            let at = u32::try_from(out.len())
                .ok()
                .and_then(|offset| address.checked_add(offset))
                .ok_or_else(|| {
                    TransportError::ParameterOutOfRange(format!(
                        "0x{address:08X} + {len} bytes overflows the address space"
                    ))
                })?;
            let part = self.read_extended_memory(at, n)?;
            out.extend_from_slice(&part);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    /// Device byte order, read from the device on first use.
    pub fn endianness(&mut self) -> Result<Endianness, TransportError> {
        if let Some(e) = self.endianness {
            return Ok(e);
        }
        let flag = self.read_extended_memory(regs::IS_BIG_ENDIAN.address, 1)?[0];
        let e = if flag & 0x01 != 0 {
            Endianness::Big
        } else {
            Endianness::Little
        };
        debug!(endianness = ?e, "Resolved device byte order");
        self.endianness = Some(e);
        Ok(e)
    }

    fn order_for(&mut self, assumption: ByteOrderAssumption) -> Result<Endianness, TransportError> {
        match assumption {
            ByteOrderAssumption::Device => self.endianness(),
            ByteOrderAssumption::Little => Ok(Endianness::Little),
        }
    }

    pub fn read_register8(&mut self, address: u32) -> Result<u8, TransportError> {
        Ok(self.read_extended_memory(address, 1)?[0])
    }

    pub fn write_register8(&mut self, address: u32, value: u8) -> Result<(), TransportError> {
        self.write_extended_memory(address, &[value])
    }

    pub fn read_register16(&mut self, address: u32) -> Result<u16, TransportError> {
        let order = self.endianness()?;
        let raw = self.read_extended_memory(address, 2)?;
        Ok(decode(&raw, order) as u16)
    }

    pub fn write_register16(&mut self, address: u32, value: u16) -> Result<(), TransportError> {
        let order = self.endianness()?;
        let bytes = encode(u32::from(value), 2, order);
        self.write_extended_memory(address, &bytes)
    }

    pub fn read_register32(&mut self, address: u32) -> Result<u32, TransportError> {
        let order = self.endianness()?;
        let raw = self.read_extended_memory(address, 4)?;
        Ok(decode(&raw, order))
    }

    pub fn write_register32(&mut self, address: u32, value: u32) -> Result<(), TransportError> {
        let order = self.endianness()?;
        let bytes = encode(value, 4, order);
        self.write_extended_memory(address, &bytes)
    }

    /// Read a register from the static registry.
    pub fn read_named(&mut self, reg: Register) -> Result<u32, TransportError> {
        let width = reg.width.bytes();
        let order = if reg.width == RegisterWidth::U8 {
            Endianness::Little
        } else {
            self.order_for(reg.order)?
        };
        let raw = self.read_extended_memory(reg.address, width)?;
        Ok(decode(&raw, order))
    }

    /// Write a register from the static registry.
    pub fn write_named(&mut self, reg: Register, value: u32) -> Result<(), TransportError> {
        let width = reg.width.bytes();
        if width < 4 && value >> (width * 8) != 0 {
            return Err(TransportError::ParameterOutOfRange(format!(
                "0x{value:X} does not fit {reg}"
            )));
        }
        let order = if reg.width == RegisterWidth::U8 {
            Endianness::Little
        } else {
            self.order_for(reg.order)?
        };
        let bytes = encode(value, width, order);
        self.write_extended_memory(reg.address, &bytes)
    }

    /// Read the system information block. Also primes the byte order cache.
    pub fn read_system_info(&mut self) -> Result<SystemInfo, TransportError> {
        let raw = self.read_extended_memory(regs::SYSTEM_INFO.address, SystemInfo::SIZE)?;
        let info = SystemInfo::from_bytes(&raw)?;
        self.endianness = Some(if info.is_big_endian {
            Endianness::Big
        } else {
            Endianness::Little
        });
        Ok(info)
    }
}

fn decode(raw: &[u8], order: Endianness) -> u32 {
    match (raw.len(), order) {
        (1, _) => u32::from(raw[0]),
        (2, Endianness::Little) => u32::from(LittleEndian::read_u16(raw)),
        (2, Endianness::Big) => u32::from(BigEndian::read_u16(raw)),
        (_, Endianness::Little) => LittleEndian::read_u32(raw),
        (_, Endianness::Big) => BigEndian::read_u32(raw),
    }
}

fn encode(value: u32, width: usize, order: Endianness) -> Vec<u8> {
    let mut buf = vec![0u8; width];
    match (width, order) {
        (1, _) => buf[0] = value as u8,
        (2, Endianness::Little) => LittleEndian::write_u16(&mut buf, value as u16),
        (2, Endianness::Big) => BigEndian::write_u16(&mut buf, value as u16),
        (_, Endianness::Little) => LittleEndian::write_u32(&mut buf, value),
        (_, Endianness::Big) => BigEndian::write_u32(&mut buf, value),
    }
    buf
}
