//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow a bootloader session without
//! the session knowing how progress is presented.

use std::fmt;
use std::sync::Arc;

use crate::bootloader::Stage;
use crate::transport::{BusError, HostBus};

/// Events emitted by a bootloader session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootEvent {
    /// A pipeline stage is starting.
    StageStarted { stage: Stage },
    /// A pipeline stage failed.
    StageFailed { stage: Stage, message: String },
    /// Status report received from the device.
    Status {
        sentinel: u16,
        version: u8,
        last_error: u8,
        flags: u8,
    },
    /// Write progress in bytes.
    Progress { current: u64, total: u64 },
    /// Recovery format-image issued after a failure in `after`.
    Recovery { after: Stage },
    /// Bus packet sent or received.
    Packet {
        direction: PacketDirection,
        length: usize,
    },
    /// Programming finished successfully.
    Complete,
}

/// Bus packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving session events.
pub trait BootObserver: Send + Sync {
    fn on_event(&self, event: &BootEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl BootObserver for NullObserver {
    fn on_event(&self, _event: &BootEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl BootObserver for TracingObserver {
    fn on_event(&self, event: &BootEvent) {
        match event {
            BootEvent::StageStarted { stage } => {
                tracing::info!(stage = %stage, "Stage started");
            }
            BootEvent::StageFailed { stage, message } => {
                tracing::error!(stage = %stage, "Stage failed: {}", message);
            }
            BootEvent::Status {
                sentinel,
                version,
                last_error,
                flags,
            } => {
                tracing::debug!(
                    sentinel = %format!("{:04X}", sentinel),
                    version,
                    last_error,
                    flags = %format!("{:02X}", flags),
                    "Status"
                );
            }
            BootEvent::Progress { current, total } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(progress = %format!("{}%", pct), "Writing image");
            }
            BootEvent::Recovery { after } => {
                tracing::warn!(after = %after, "Re-formatting image after failure");
            }
            BootEvent::Packet { direction, length } => {
                tracing::trace!(dir = %direction, len = length, "Bus packet");
            }
            BootEvent::Complete => {
                tracing::info!("Programming complete");
            }
        }
    }
}

/// Bus wrapper that emits packet events.
pub struct ObservableBus<B: HostBus, O: BootObserver> {
    inner: B,
    observer: Arc<O>,
    pending: usize,
}

impl<B: HostBus, O: BootObserver> ObservableBus<B, O> {
    pub fn new(inner: B, observer: Arc<O>) -> Self {
        Self {
            inner,
            observer,
            pending: 0,
        }
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: HostBus, O: BootObserver> HostBus for ObservableBus<B, O> {
    fn begin_transmission(&mut self, address: u8) {
        self.pending = 0;
        self.inner.begin_transmission(address);
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        let n = self.inner.write(bytes)?;
        self.pending += n;
        Ok(n)
    }

    fn end_transmission(&mut self, send_stop: bool) -> Result<(), BusError> {
        self.inner.end_transmission(send_stop)?;
        self.observer.on_event(&BootEvent::Packet {
            direction: PacketDirection::Tx,
            length: self.pending,
        });
        Ok(())
    }

    fn request_read(
        &mut self,
        address: u8,
        count: usize,
        send_stop: bool,
    ) -> Result<usize, BusError> {
        let available = self.inner.request_read(address, count, send_stop)?;
        self.observer.on_event(&BootEvent::Packet {
            direction: PacketDirection::Rx,
            length: available,
        });
        Ok(available)
    }

    fn read(&mut self) -> Result<u8, BusError> {
        self.inner.read()
    }

    fn data_ready_asserted(&mut self) -> bool {
        self.inner.data_ready_asserted()
    }
}
