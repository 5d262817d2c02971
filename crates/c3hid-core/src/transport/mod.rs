//! Transport layer module.

pub mod mock;
pub mod sim;
pub mod traits;

pub use mock::{MockBus, MockWrite};
pub use sim::{CommandFault, FormatImageRequest, ReplyFault, SimConfig, SimMode, SimulatedDevice};
pub use traits::{BusError, HostBus};
