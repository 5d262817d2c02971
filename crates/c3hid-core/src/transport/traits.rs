//! Host bus abstraction.
//!
//! Defines the `HostBus` trait for I2C-style transfers, allowing different
//! implementations (hardware adapters, scripted mocks, simulated devices).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Device 0x{address:02X} did not acknowledge")]
    Nack { address: u8 },

    #[error("No response queued for read from 0x{address:02X}")]
    NoResponse { address: u8 },

    #[error("Read past end of received data")]
    Underflow,

    #[error("Transfer not started")]
    NotStarted,

    #[error("Bus fault: {0}")]
    Fault(String),
}

/// Abstract host bus interface.
///
/// Mirrors the shape of a microcontroller two-wire API: a write transaction is
/// opened with [`begin_transmission`](HostBus::begin_transmission), filled
/// with [`write`](HostBus::write) and sent by
/// [`end_transmission`](HostBus::end_transmission). A read is a
/// [`request_read`](HostBus::request_read) followed by one
/// [`read`](HostBus::read) per available byte.
///
/// Implementations are single-owner; every method takes `&mut self`.
pub trait HostBus {
    /// Start buffering a write transaction to `address`.
    fn begin_transmission(&mut self, address: u8);

    /// Append bytes to the open transaction. Returns how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError>;

    /// Send the buffered transaction. With `send_stop == false` the bus is
    /// held for a following repeated-start read.
    fn end_transmission(&mut self, send_stop: bool) -> Result<(), BusError>;

    /// Read `count` bytes from `address`. Returns how many are available.
    fn request_read(&mut self, address: u8, count: usize, send_stop: bool)
    -> Result<usize, BusError>;

    /// Take the next received byte.
    fn read(&mut self) -> Result<u8, BusError>;

    /// Sample the device's data-ready line.
    fn data_ready_asserted(&mut self) -> bool;
}

impl<B: HostBus + ?Sized> HostBus for &mut B {
    fn begin_transmission(&mut self, address: u8) {
        (**self).begin_transmission(address)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        (**self).write(bytes)
    }

    fn end_transmission(&mut self, send_stop: bool) -> Result<(), BusError> {
        (**self).end_transmission(send_stop)
    }

    fn request_read(
        &mut self,
        address: u8,
        count: usize,
        send_stop: bool,
    ) -> Result<usize, BusError> {
        (**self).request_read(address, count, send_stop)
    }

    fn read(&mut self) -> Result<u8, BusError> {
        (**self).read()
    }

    fn data_ready_asserted(&mut self) -> bool {
        (**self).data_ready_asserted()
    }
}
