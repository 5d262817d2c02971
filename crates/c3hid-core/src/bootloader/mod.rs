//! Firmware update protocol carried over feature report 7.

pub mod command;
pub mod image;
pub mod session;
pub mod status;

pub use command::{BootCommand, COMMAND_PAYLOAD_LEN, CommandError, FormatImageParams};
pub use image::{Chunk, ChunkIterator, FirmwareImage, ImageError, chunk_plan};
pub use session::{BootloaderError, BootloaderSession, ProgramError, ProgramReport, Stage, Step};
pub use status::{BootloaderStatus, DeviceError, Mode, StatusError, TimingHints};
