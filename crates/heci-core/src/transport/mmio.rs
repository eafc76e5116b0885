//! Memory-mapped register backend.

use std::ptr::{self, NonNull};

use tracing::debug;

use super::traits::HeciRegisters;
use crate::protocol::constants::ME_CSR_HA;

/// Size of the HECI register window.
pub const HECI_MMIO_SIZE: usize = 0x1000;

/// Volatile MMIO access to a mapped HECI BAR.
pub struct MmioRegisters {
    base: NonNull<u32>,
}

// The window is plain device memory; exclusivity is enforced by the
// `&mut HeciDeviceHandle` every transport call requires.
unsafe impl Send for MmioRegisters {}

impl MmioRegisters {
    /// Wrap a mapped register window.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `HECI_MMIO_SIZE` bytes of mapped,
    /// uncached device memory for the lifetime of the returned value, and no
    /// other code may access the window concurrently.
    pub unsafe fn new(base: NonNull<u32>) -> Self {
        debug!(base = %format!("{:p}", base), "Mapped HECI register window");
        Self { base }
    }

    /// Wrap an identity-mapped physical address (firmware or early boot).
    ///
    /// # Safety
    ///
    /// Same requirements as [`MmioRegisters::new`]; `address` must be
    /// identity mapped.
    pub unsafe fn from_physical(address: u64) -> Option<Self> {
        NonNull::new(address as usize as *mut u32).map(|base| unsafe { Self::new(base) })
    }

    fn register(&self, offset: u32) -> *mut u32 {
        debug_assert!(offset as usize % 4 == 0 && (offset as usize) <= ME_CSR_HA as usize);
        // SAFETY: offset stays inside the window guaranteed by `new`.
        unsafe { self.base.as_ptr().add(offset as usize / 4) }
    }
}

impl HeciRegisters for MmioRegisters {
    fn read32(&self, offset: u32) -> u32 {
        // SAFETY: see `register`.
        unsafe { ptr::read_volatile(self.register(offset)) }
    }

    fn write32(&self, offset: u32, value: u32) {
        // SAFETY: see `register`.
        unsafe { ptr::write_volatile(self.register(offset), value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_mmio_volatile_access() {
        let mut window = vec![0u32; HECI_MMIO_SIZE / 4];
        let base = NonNull::new(window.as_mut_ptr()).unwrap();
        let regs = unsafe { MmioRegisters::new(base) };

        regs.write32(H_CSR, CSR_RDY);
        regs.write32(ME_CSR_HA, 0x0800_0008);
        assert_eq!(regs.read32(H_CSR), CSR_RDY);
        assert_eq!(regs.read32(ME_CSR_HA), 0x0800_0008);
        drop(regs);
        assert_eq!(window[1], CSR_RDY);
        assert_eq!(window[3], 0x0800_0008);
    }

    #[test]
    fn test_null_physical_address() {
        assert!(unsafe { MmioRegisters::from_physical(0) }.is_none());
    }
}
