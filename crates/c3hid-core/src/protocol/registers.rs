//! Static registry of named extended-memory registers.
//!
//! Call sites refer to registers by name through [`lookup`] or the
//! [`regs`] constants rather than by raw address.

use std::fmt;

/// Width of a register in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWidth {
    U8,
    U16,
    U32,
}

impl RegisterWidth {
    pub fn bytes(self) -> usize {
        match self {
            RegisterWidth::U8 => 1,
            RegisterWidth::U16 => 2,
            RegisterWidth::U32 => 4,
        }
    }
}

/// Byte order assumed when (de)serializing a multi-byte register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrderAssumption {
    /// Follow the endianness flag the device reports.
    Device,
    /// Always little-endian, regardless of the device flag.
    Little,
}

/// A named register in the extended memory space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub address: u32,
    pub width: RegisterWidth,
    pub order: ByteOrderAssumption,
}

impl Register {
    const fn new(name: &'static str, address: u32, width: RegisterWidth) -> Self {
        Self {
            name,
            address,
            width,
            order: ByteOrderAssumption::Device,
        }
    }

    const fn little(name: &'static str, address: u32, width: RegisterWidth) -> Self {
        Self {
            name,
            address,
            width,
            order: ByteOrderAssumption::Little,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@0x{:08X}", self.name, self.address)
    }
}

/// Register definitions.
pub mod regs {
    use super::Register;
    use super::RegisterWidth::{U8, U16, U32};

    pub const SYS_CONFIG1: Register = Register::new("SYS_CONFIG1", 0x2000_0008, U8);
    pub const SYS_COMMAND: Register = Register::new("SYS_COMMAND", 0x2000_0408, U8);
    pub const HARDWARE_ID: Register = Register::new("HARDWARE_ID", 0x2000_0808, U8);
    pub const FIRMWARE_ID: Register = Register::new("FIRMWARE_ID", 0x2000_0809, U8);
    pub const VENDOR_ID: Register = Register::new("VENDOR_ID", 0x2000_080A, U16);
    pub const PRODUCT_ID: Register = Register::new("PRODUCT_ID", 0x2000_080C, U16);
    pub const VERSION_ID: Register = Register::new("VERSION_ID", 0x2000_080E, U16);
    pub const FIRMWARE_REVISION: Register = Register::new("FIRMWARE_REVISION", 0x2000_0810, U32);
    /// Bit 0 set means the device stores multi-byte values big-endian.
    pub const IS_BIG_ENDIAN: Register = Register::new("IS_BIG_ENDIAN", 0x2000_0824, U8);

    pub const SENSOR_X_COUNT: Register = Register::new("SENSOR_X_COUNT", 0x2001_080C, U8);
    pub const SENSOR_Y_COUNT: Register = Register::new("SENSOR_Y_COUNT", 0x2001_080D, U8);

    pub const ENABLE_FLAGS: Register = Register::new("ENABLE_FLAGS", 0x2002_0008, U8);
    pub const COMP_COMMAND: Register = Register::new("COMP_COMMAND", 0x2002_0408, U8);

    pub const XY_CONFIG_HEADER: Register = Register::new("XY_CONFIG_HEADER", 0x2008_0000, U32);
    pub const XY_CONFIG: Register = Register::new("XY_CONFIG", 0x2008_0018, U8);

    pub const POWER_HEADER: Register = Register::new("POWER_HEADER", 0x200A_0000, U32);
    pub const POWER_ACTIVE_TIME: Register = Register::new("POWER_ACTIVE_TIME", 0x200A_0008, U16);
    pub const POWER_IDLE_TIME: Register = Register::new("POWER_IDLE_TIME", 0x200A_000A, U16);
    pub const POWER_SLEEP_TIME: Register = Register::new("POWER_SLEEP_TIME", 0x200A_000C, U16);
    pub const POWER_DEEP_SLEEP_TIME: Register =
        Register::new("POWER_DEEP_SLEEP_TIME", 0x200A_000E, U16);
    pub const POWER_SETTINGS: Register = Register::new("POWER_SETTINGS", 0x200A_0010, U8);
    pub const POWER_COMMAND: Register = Register::new("POWER_COMMAND", 0x200A_0408, U8);

    pub const FEED_CONFIG1: Register = Register::new("FEED_CONFIG1", 0x200E_0008, U8);
    pub const FEED_CONFIG2: Register = Register::new("FEED_CONFIG2", 0x200E_0009, U8);
    pub const FEED_CONFIG3: Register = Register::new("FEED_CONFIG3", 0x200E_000A, U8);
    pub const FEED_CONFIG4: Register = Register::new("FEED_CONFIG4", 0x200E_000B, U8);

    pub const PROJECT_SPECIFIC_HEADER: Register =
        Register::new("PROJECT_SPECIFIC_HEADER", 0x2019_0000, U32);

    pub const COMP_MATRIX_LENGTH: Register =
        Register::little("COMP_MATRIX_LENGTH", 0x3001_0000, U16);
    pub const COMP_MATRIX_DATA: Register = Register::little("COMP_MATRIX_DATA", 0x3001_0002, U16);

    /// Start of the 29-byte system information block.
    pub const SYSTEM_INFO: Register = Register::little("SYSTEM_INFO", 0x2000_0808, U8);

    pub const MEAS_GLOBAL_INFO: Register = Register::little("MEAS_GLOBAL_INFO", 0x5100_0000, U8);
    pub const MEAS_INFO: Register = Register::little("MEAS_INFO", 0x5110_0000, U8);
    pub const MEAS_GROUP_INFO: Register = Register::little("MEAS_GROUP_INFO", 0x5120_0000, U8);
    pub const MEAS_NOISE_CONFIG: Register =
        Register::little("MEAS_NOISE_CONFIG", 0x5150_0000, U8);

    pub const ALL: &[Register] = &[
        SYS_CONFIG1,
        SYS_COMMAND,
        HARDWARE_ID,
        FIRMWARE_ID,
        VENDOR_ID,
        PRODUCT_ID,
        VERSION_ID,
        FIRMWARE_REVISION,
        IS_BIG_ENDIAN,
        SENSOR_X_COUNT,
        SENSOR_Y_COUNT,
        ENABLE_FLAGS,
        COMP_COMMAND,
        XY_CONFIG_HEADER,
        XY_CONFIG,
        POWER_HEADER,
        POWER_ACTIVE_TIME,
        POWER_IDLE_TIME,
        POWER_SLEEP_TIME,
        POWER_DEEP_SLEEP_TIME,
        POWER_SETTINGS,
        POWER_COMMAND,
        FEED_CONFIG1,
        FEED_CONFIG2,
        FEED_CONFIG3,
        FEED_CONFIG4,
        PROJECT_SPECIFIC_HEADER,
        COMP_MATRIX_LENGTH,
        COMP_MATRIX_DATA,
        SYSTEM_INFO,
        MEAS_GLOBAL_INFO,
        MEAS_INFO,
        MEAS_GROUP_INFO,
        MEAS_NOISE_CONFIG,
    ];
}

/// Address stride between consecutive measurement or group info blocks.
pub const MEAS_BLOCK_STRIDE: u32 = 0x1000;
/// Number of measurement groups the firmware supports. Group 4 holds noise measurements.
pub const MEAS_GROUP_COUNT: u32 = 5;
/// Number of measurement info blocks.
pub const MEAS_MAX_COUNT: u32 = 20;

/// Look up a register by name (case-insensitive).
pub fn lookup(name: &str) -> Option<Register> {
    regs::ALL
        .iter()
        .copied()
        .find(|r| r.name.eq_ignore_ascii_case(name))
}

/// Address of the info block for measurement group `group`.
pub fn group_info_address(group: u32) -> Option<u32> {
    (group < MEAS_GROUP_COUNT).then(|| regs::MEAS_GROUP_INFO.address + group * MEAS_BLOCK_STRIDE)
}

/// Address of the info block for measurement `index`.
pub fn measurement_info_address(index: u32) -> Option<u32> {
    (index < MEAS_MAX_COUNT).then(|| regs::MEAS_INFO.address + index * MEAS_BLOCK_STRIDE)
}
