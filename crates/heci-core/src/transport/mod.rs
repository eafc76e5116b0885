//! Register access layer.

pub mod mmio;
pub mod mock;
pub mod traits;

pub use mmio::MmioRegisters;
pub use mock::{MockHeci, MockPciConfig};
pub use traits::{HeciError, HeciRegisters, PciAddress, PciConfigSpace};
