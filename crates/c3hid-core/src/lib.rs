//! C3HID-Core: host-side HID-over-I2C protocol stack for touch controllers.
//!
//! This crate talks to touch-sensor chips that expose standard HID registers,
//! a vendor extended-memory window and a firmware bootloader over a single
//! I2C connection.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Checksum**: byte-sum, Fletcher-16 and Fletcher-32 with continuation
//! - **Protocol**: Constants, register registry, descriptor headers
//! - **Transport**: Host bus abstraction (mock, simulated device)
//! - **Framer**: Extended-memory frames, registers, HID commands, feature reports
//! - **Report**: Input report decoding and queries
//! - **Bootloader**: Status parsing, command encoding, programming session
//! - **Retry**: Bounded polling policy and clocks
//! - **Events**: Observer pattern for UI decoupling
//! - **Config**: TOML session configuration
//!
//! # Example
//!
//! ```no_run
//! use c3hid_core::bootloader::{BootloaderSession, FirmwareImage};
//! use c3hid_core::config::SessionConfig;
//! use c3hid_core::framer::TransportFramer;
//! use c3hid_core::transport::SimulatedDevice;
//!
//! let config = SessionConfig::default();
//! let device = SimulatedDevice::default();
//! let framer = TransportFramer::new(device, config.device_address);
//! let mut session = BootloaderSession::new(framer, config.bootloader);
//!
//! let image = FirmwareImage::new(std::fs::read("touch.bin").unwrap(), 0x0002_D420).unwrap();
//! session.program(&image).expect("programming failed");
//! ```

pub mod bootloader;
pub mod checksum;
pub mod config;
pub mod events;
pub mod framer;
pub mod protocol;
pub mod report;
pub mod retry;
pub mod transport;

// Re-exports for convenience
pub use bootloader::{
    BootloaderError, BootloaderSession, BootloaderStatus, DeviceError, FirmwareImage, Mode,
    ProgramError, ProgramReport, Stage, Step,
};
pub use config::{BootloaderConfig, SessionConfig, StageTiming};
pub use events::{BootEvent, BootObserver, NullObserver, ObservableBus, TracingObserver};
pub use framer::{AddressMap, Endianness, TransportError, TransportFramer};
pub use report::{AbsoluteLayout, HidReport, ReportData, decode_report, decode_report_with};
pub use retry::{Clock, FakeClock, RetryPolicy, SystemClock};
pub use transport::{BusError, HostBus, MockBus, SimulatedDevice};
