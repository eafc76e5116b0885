//! Register access abstraction.
//!
//! Defines the `HeciRegisters` and `PciConfigSpace` traits so the transport
//! can run against real MMIO or an in-memory controller.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeciError {
    #[error("Circular buffer overflow: {filled} slots filled, depth {depth}, {requested} requested")]
    Overflow {
        filled: u8,
        depth: u8,
        requested: usize,
    },

    #[error("HECI device not present")]
    DeviceNotPresent,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Response of {needed} bytes does not fit receive buffer of {capacity} bytes")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Invalid message length {length} (max {max})")]
    InvalidLength { length: usize, max: usize },

    #[error("No data available")]
    NoData,
}

/// MMIO register window of one HECI function.
///
/// Offsets are relative to the function's BAR0. Reads of the ME read window
/// have side effects (they pop a slot), so implementations must not cache.
pub trait HeciRegisters {
    /// Read a 32-bit register.
    fn read32(&self, offset: u32) -> u32;

    /// Write a 32-bit register.
    fn write32(&self, offset: u32, value: u32);
}

impl<T: HeciRegisters + ?Sized> HeciRegisters for &T {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}

/// PCI bus/device/function triple.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }
}

impl fmt::Debug for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:02X}.{}", self.bus, self.device, self.function)
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// PCI configuration space access.
///
/// Only dword accessors are required; narrower accesses are derived with
/// read-modify-write on the containing dword.
pub trait PciConfigSpace {
    fn read32(&self, address: PciAddress, offset: u16) -> u32;

    fn write32(&self, address: PciAddress, offset: u16, value: u32);

    fn read16(&self, address: PciAddress, offset: u16) -> u16 {
        let shift = (offset & 0x2) * 8;
        (self.read32(address, offset & !0x3) >> shift) as u16
    }

    fn write16(&self, address: PciAddress, offset: u16, value: u16) {
        let aligned = offset & !0x3;
        let shift = (offset & 0x2) * 8;
        let current = self.read32(address, aligned);
        let updated = (current & !(0xFFFF << shift)) | (value as u32) << shift;
        self.write32(address, aligned, updated);
    }

    fn read8(&self, address: PciAddress, offset: u16) -> u8 {
        let shift = (offset & 0x3) * 8;
        (self.read32(address, offset & !0x3) >> shift) as u8
    }
}
