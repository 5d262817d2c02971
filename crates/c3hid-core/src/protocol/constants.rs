//! Protocol constants for the Gen6 HID-over-I2C touch controllers.

// ============================================================================
// Bus
// ============================================================================

/// Default 7-bit I2C address of the controller.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x2C;

/// Largest input report the host reads in one transfer.
pub const MAX_REPORT_LEN: usize = 53;

// ============================================================================
// HID-over-I2C registers
// ============================================================================

/// HID descriptor register.
pub const HID_DESCRIPTOR_REGISTER: u16 = 0x0020;
/// Length of the HID descriptor block.
pub const HID_DESCRIPTOR_LEN: usize = 30;
/// Default command register (overridden by the HID descriptor).
pub const COMMAND_REGISTER: u16 = 0x0005;
/// Default data register (overridden by the HID descriptor).
pub const DATA_REGISTER: u16 = 0x0006;

/// Extended memory write, standard virtual map.
pub const EXT_MEM_WRITE_MAPPED: u16 = 0x0900;
/// Extended memory read, standard virtual map.
pub const EXT_MEM_READ_MAPPED: u16 = 0x0901;
/// Extended memory write, raw physical map.
pub const EXT_MEM_WRITE_RAW: u16 = 0x0902;
/// Extended memory read, raw physical map.
pub const EXT_MEM_READ_RAW: u16 = 0x0903;

/// Bytes of header in an extended memory write (register + address + count).
pub const EXT_MEM_HEADER_LEN: usize = 8;
/// Overhead of an extended memory reply (length LE16 + checksum).
pub const EXT_MEM_REPLY_OVERHEAD: usize = 3;
/// Largest payload a single extended memory transfer may carry.
pub const EXT_MEM_MAX_PAYLOAD: usize = u16::MAX as usize - EXT_MEM_REPLY_OVERHEAD;

// ============================================================================
// HID command opcodes and report types
// ============================================================================

pub const OPCODE_RESET: u8 = 0x01;
pub const OPCODE_GET_REPORT: u8 = 0x02;
pub const OPCODE_SET_REPORT: u8 = 0x03;
pub const OPCODE_SET_POWER: u8 = 0x08;

pub const REPORT_TYPE_INPUT: u8 = 0x01;
pub const REPORT_TYPE_OUTPUT: u8 = 0x02;
pub const REPORT_TYPE_FEATURE: u8 = 0x03;

/// Highest report id that fits in the 4-bit id field of a command header.
pub const MAX_INLINE_REPORT_ID: u8 = 14;
/// Nibble value signalling that the report id follows in an extra byte.
pub const REPORT_ID_ESCAPE: u8 = 0x0F;

// ============================================================================
// Input report ids
// ============================================================================

pub const REPORT_ID_PTP: u8 = 0x01;
pub const REPORT_ID_MOUSE: u8 = 0x06;
pub const REPORT_ID_BOOTLOADER: u8 = 0x07;
pub const REPORT_ID_KEYBOARD: u8 = 0x08;
pub const REPORT_ID_ABSOLUTE: u8 = 0x09;
pub const REPORT_ID_MEASUREMENT: u8 = 0x0E;
pub const REPORT_ID_STICK: u8 = 0x0F;

// ============================================================================
// Button and palm masks
// ============================================================================

pub const BUTTON_1: u8 = 0x01;
pub const BUTTON_2: u8 = 0x02;
pub const BUTTON_3: u8 = 0x04;
pub const BUTTON_ALL: u8 = BUTTON_1 | BUTTON_2 | BUTTON_3;
/// Button bit reported by the absolute multi-touch report for a click.
pub const BUTTON_CLICK: u8 = 0x80;

pub const PALM_REJECT_MASK: u8 = 0x80;
pub const CONFIDENCE_MASK: u8 = 0x02;
pub const SINGLE_SAMPLE_MASK: u8 = 0x01;

// ============================================================================
// Bootloader
// ============================================================================

/// Fixed length of every bootloader feature report, counted from the length field.
pub const BOOTLOADER_REPORT_LEN: usize = 533;
/// Padding byte for unused bootloader report space.
pub const BOOTLOADER_PAD: u8 = 0xDB;
/// Largest data payload in a single write-chunk command.
pub const MAX_WRITE_PAYLOAD: usize = 520;
/// Largest data payload returned by a single read-memory command.
pub const MAX_READ_PAYLOAD: usize = 514;

pub const BL_CMD_WRITE: u8 = 0;
pub const BL_CMD_FLUSH: u8 = 1;
pub const BL_CMD_VALIDATE: u8 = 2;
pub const BL_CMD_RESET: u8 = 3;
pub const BL_CMD_FORMAT_IMAGE: u8 = 4;
pub const BL_CMD_FORMAT_REGION: u8 = 5;
pub const BL_CMD_INVOKE_BOOTLOADER: u8 = 6;
pub const BL_CMD_WRITE_MEMORY: u8 = 7;
pub const BL_CMD_READ_MEMORY: u8 = 8;

/// Sentinel values reported while running the bootloader.
pub const BOOTLOADER_SENTINELS: &[u16] = &[0x6C42, 0xC35A];
/// Sentinel values reported while running the application image.
pub const IMAGE_SENTINELS: &[u16] = &[0x5AC3, 0x6D49, 0x426C];

/// Status flag: device still processing the previous command.
pub const STATUS_FLAG_BUSY: u8 = 0x01;
/// Status flag: the programmed image passed validation.
pub const STATUS_FLAG_VALID_IMAGE: u8 = 0x02;

/// First protocol version that reports timing hints in its status.
pub const VERSION_TIMING_HINTS: u8 = 8;
/// First protocol version with self-describing format-image addressing.
pub const VERSION_SELF_DESCRIBING: u8 = 9;
/// Descriptor address sent with format-image when self-describing.
pub const SELF_DESCRIBING_DESCRIPTOR: u16 = 0xFFFF;
/// Bus address sent with format-image when self-describing.
pub const SELF_DESCRIBING_ADDRESS: u8 = 0xFF;

/// Validation type requested by the validate command.
pub const VALIDATE_TYPE_IMAGE: u8 = 1;
