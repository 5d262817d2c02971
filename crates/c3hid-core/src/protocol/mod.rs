//! Protocol module - register map, wire constants and fixed-layout headers.

pub mod constants;
pub mod header;
pub mod registers;

pub use constants::*;
pub use header::{CommandHeader, FirmwareRevision, HeaderError, HidDescriptor, SystemInfo};
pub use registers::{ByteOrderAssumption, Register, RegisterWidth, regs};
