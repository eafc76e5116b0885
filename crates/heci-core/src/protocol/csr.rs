//! Control/status register decoding.
//!
//! H_CSR and ME_CSR_HA share one layout: interrupt and ready bits in the low
//! byte, followed by the ring read pointer, write pointer and depth.

use std::fmt;

use super::constants::*;

/// Decoded HECI control/status register (host or ME side).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HeciCsr(u32);

impl HeciCsr {
    /// Wrap a raw register value.
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Raw register value.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Build a CSR value from its fields. Used by the simulated controller.
    pub const fn compose(flags: u32, read_pointer: u8, write_pointer: u8, depth: u8) -> Self {
        Self(
            (flags & 0xFF)
                | (read_pointer as u32) << CSR_CBRP_SHIFT
                | (write_pointer as u32) << CSR_CBWP_SHIFT
                | (depth as u32) << CSR_CBD_SHIFT,
        )
    }

    /// All-ones read: the function is absent or decode is disabled.
    pub fn is_absent(&self) -> bool {
        self.0 == REGISTER_ABSENT
    }

    pub fn interrupt_enable(&self) -> bool {
        self.0 & CSR_IE != 0
    }

    pub fn interrupt_status(&self) -> bool {
        self.0 & CSR_IS != 0
    }

    pub fn interrupt_generate(&self) -> bool {
        self.0 & CSR_IG != 0
    }

    pub fn ready(&self) -> bool {
        self.0 & CSR_RDY != 0
    }

    pub fn reset(&self) -> bool {
        self.0 & CSR_RST != 0
    }

    pub fn read_pointer(&self) -> u8 {
        (self.0 >> CSR_CBRP_SHIFT) as u8
    }

    pub fn write_pointer(&self) -> u8 {
        (self.0 >> CSR_CBWP_SHIFT) as u8
    }

    pub fn depth(&self) -> u8 {
        (self.0 >> CSR_CBD_SHIFT) as u8
    }

    /// Value to write back for a doorbell.
    ///
    /// IS is write-one-to-clear, so it is masked out unless `ack_interrupt`
    /// asks to clear a pending status.
    pub fn with_doorbell(&self, ack_interrupt: bool) -> u32 {
        let mut value = self.0 | CSR_IG;
        if !ack_interrupt {
            value &= !CSR_IS;
        }
        value
    }

    /// Value to write back with the given control bits set or cleared.
    pub fn with_bits(&self, set: u32, clear: u32) -> u32 {
        (self.0 | set) & !clear & !CSR_IS
    }
}

impl fmt::Debug for HeciCsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HeciCsr({:08X} rdy={} rst={} ie={} is={} rp={} wp={} depth={})",
            self.0,
            self.ready() as u8,
            self.reset() as u8,
            self.interrupt_enable() as u8,
            self.interrupt_status() as u8,
            self.read_pointer(),
            self.write_pointer(),
            self.depth()
        )
    }
}

impl fmt::Display for HeciCsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{} CBRP={} CBWP={} CBD={}",
            if self.ready() { "RDY " } else { "" },
            if self.reset() { "RST " } else { "" },
            if self.interrupt_enable() { "IE " } else { "" },
            if self.interrupt_status() { "IS " } else { "" },
            if self.interrupt_generate() { "IG " } else { "" },
            self.read_pointer(),
            self.write_pointer(),
            self.depth()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_fields() {
        let csr = HeciCsr::from_raw(0x2007_0309);
        assert!(csr.ready());
        assert!(csr.interrupt_enable());
        assert!(!csr.reset());
        assert_eq!(csr.read_pointer(), 0x03);
        assert_eq!(csr.write_pointer(), 0x07);
        assert_eq!(csr.depth(), 0x20);
    }

    #[test]
    fn test_compose_matches_fields() {
        let csr = HeciCsr::compose(CSR_RDY | CSR_IS, 0xFE, 0x02, 0x80);
        assert!(csr.ready());
        assert!(csr.interrupt_status());
        assert_eq!(csr.read_pointer(), 0xFE);
        assert_eq!(csr.write_pointer(), 0x02);
        assert_eq!(csr.depth(), 0x80);
    }

    #[test]
    fn test_doorbell_preserves_pending_status() {
        let csr = HeciCsr::compose(CSR_RDY | CSR_IS, 0, 0, 8);
        let value = csr.with_doorbell(false);
        assert_eq!(value & CSR_IG, CSR_IG);
        assert_eq!(value & CSR_IS, 0);

        let acked = csr.with_doorbell(true);
        assert_eq!(acked & CSR_IS, CSR_IS);
    }

    #[test]
    fn test_absent() {
        assert!(HeciCsr::from_raw(REGISTER_ABSENT).is_absent());
        assert!(!HeciCsr::from_raw(0).is_absent());
    }
}
