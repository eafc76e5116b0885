//! HECI device identification and resolution.
//!
//! A `HeciDeviceHandle` is resolved once per boot phase: the PCI function is
//! brought to D0, memory decode and bus mastering are enabled and BAR0 is
//! read. The handle then owns the register backend for that function.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::protocol::constants::*;
use crate::transport::{HeciError, HeciRegisters, PciAddress, PciConfigSpace};

/// Physical HECI instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeciDeviceId {
    #[default]
    Heci1,
    Heci2,
    Heci3,
    /// fTPM command window. It has no PCI function of its own and is only
    /// reachable through an explicit base address.
    Ftpm,
}

impl HeciDeviceId {
    /// PCI location, if the instance is a PCI function.
    pub fn pci_address(&self) -> Option<PciAddress> {
        let function = match self {
            HeciDeviceId::Heci1 => HECI1_FUNCTION,
            HeciDeviceId::Heci2 => HECI2_FUNCTION,
            HeciDeviceId::Heci3 => HECI3_FUNCTION,
            HeciDeviceId::Ftpm => return None,
        };
        Some(PciAddress::new(HECI_BUS, HECI_DEVICE, function))
    }
}

impl fmt::Display for HeciDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeciDeviceId::Heci1 => write!(f, "HECI1"),
            HeciDeviceId::Heci2 => write!(f, "HECI2"),
            HeciDeviceId::Heci3 => write!(f, "HECI3"),
            HeciDeviceId::Ftpm => write!(f, "FTPM"),
        }
    }
}

impl FromStr for HeciDeviceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heci1" => Ok(HeciDeviceId::Heci1),
            "heci2" => Ok(HeciDeviceId::Heci2),
            "heci3" => Ok(HeciDeviceId::Heci3),
            "ftpm" => Ok(HeciDeviceId::Ftpm),
            other => Err(format!("unknown HECI device '{other}'")),
        }
    }
}

/// Owned handle to one HECI instance.
///
/// Transport calls take `&mut HeciDeviceHandle`, so exchanges on a device are
/// strictly sequential.
pub struct HeciDeviceHandle<R: HeciRegisters> {
    id: HeciDeviceId,
    base_address: u64,
    registers: R,
    max_message_len: usize,
}

impl<R: HeciRegisters> HeciDeviceHandle<R> {
    pub fn new(id: HeciDeviceId, base_address: u64, registers: R) -> Self {
        Self {
            id,
            base_address,
            registers,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Override the maximum message size in bytes.
    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    pub fn id(&self) -> HeciDeviceId {
        self.id
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    pub(crate) fn read32(&self, offset: u32) -> u32 {
        self.registers.read32(offset)
    }

    pub(crate) fn write32(&self, offset: u32, value: u32) {
        self.registers.write32(offset, value)
    }
}

impl<R: HeciRegisters> fmt::Debug for HeciDeviceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeciDeviceHandle")
            .field("id", &self.id)
            .field("base_address", &format_args!("{:#X}", self.base_address))
            .field("max_message_len", &self.max_message_len)
            .finish()
    }
}

/// Find a capability in the function's capability list.
fn find_capability<P: PciConfigSpace>(pci: &P, address: PciAddress, cap_id: u8) -> Option<u16> {
    if pci.read16(address, PCI_STATUS_OFFSET) & PCI_STATUS_CAPABILITY_LIST == 0 {
        return None;
    }
    let mut ptr = pci.read8(address, PCI_CAPABILITY_PTR_OFFSET) & 0xFC;
    // 48 entries is the most a 256-byte config space can hold.
    for _ in 0..48 {
        if ptr == 0 {
            return None;
        }
        let header = pci.read16(address, ptr as u16);
        if header as u8 == cap_id {
            return Some(ptr as u16);
        }
        ptr = (header >> 8) as u8 & 0xFC;
    }
    None
}

/// Enable a HECI function and return the base address of its registers.
#[instrument(level = "info", skip(pci), fields(device = %id))]
pub fn resolve_base_address<P: PciConfigSpace>(
    pci: &P,
    id: HeciDeviceId,
) -> Result<u64, HeciError> {
    let address = id.pci_address().ok_or(HeciError::DeviceNotPresent)?;

    let vendor = pci.read16(address, PCI_VENDOR_ID_OFFSET);
    if vendor != INTEL_VENDOR_ID {
        debug!(vendor = %format!("{:04X}", vendor), "No HECI function");
        return Err(HeciError::DeviceNotPresent);
    }
    let device_id = pci.read16(address, PCI_DEVICE_ID_OFFSET);
    if !SUPPORTED_DEVICE_IDS.contains(&device_id) {
        warn!(device_id = %format!("{:04X}", device_id), "Unrecognized HECI device ID");
    }

    if let Some(pm) = find_capability(pci, address, PCI_CAP_ID_PM) {
        let pmcsr = pci.read16(address, pm + PCI_PM_CSR_OFFSET);
        if pmcsr & PCI_PM_CSR_POWER_STATE_MASK != 0 {
            debug!(state = pmcsr & PCI_PM_CSR_POWER_STATE_MASK, "Bringing function to D0");
            pci.write16(
                address,
                pm + PCI_PM_CSR_OFFSET,
                pmcsr & !PCI_PM_CSR_POWER_STATE_MASK,
            );
        }
    }

    let command = pci.read16(address, PCI_COMMAND_OFFSET);
    let wanted = PCI_COMMAND_MEMORY_SPACE | PCI_COMMAND_BUS_MASTER;
    if command & wanted != wanted {
        pci.write16(address, PCI_COMMAND_OFFSET, command | wanted);
    }

    let bar_low = pci.read32(address, PCI_BAR0_OFFSET);
    let mut base = bar_low as u64;
    if bar_low & 0x6 == PCI_BAR_TYPE_64BIT {
        base |= (pci.read32(address, PCI_BAR1_OFFSET) as u64) << 32;
    }
    base &= !PCI_BAR_ATTR_MASK;
    if base == 0 {
        warn!("HECI BAR0 is not programmed");
        return Err(HeciError::DeviceNotPresent);
    }

    info!(
        pci = %address,
        device_id = %format!("{:04X}", device_id),
        base = %format!("{:#X}", base),
        "HECI function enabled"
    );
    Ok(base)
}

/// Host Firmware Status register 1 (HFSTS1).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FirmwareStatus(u32);

impl FirmwareStatus {
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Current working state (bits 0-3).
    pub fn current_state(&self) -> u8 {
        (self.0 & 0xF) as u8
    }

    pub fn manufacturing_mode(&self) -> bool {
        self.0 & (1 << 4) != 0
    }

    pub fn fpt_bad(&self) -> bool {
        self.0 & (1 << 5) != 0
    }

    /// Operation state (bits 6-8).
    pub fn operation_state(&self) -> u8 {
        ((self.0 >> 6) & 0x7) as u8
    }

    pub fn init_complete(&self) -> bool {
        self.0 & (1 << 9) != 0
    }

    /// Error code (bits 12-15).
    pub fn error_code(&self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    /// Operation mode (bits 16-19).
    pub fn operation_mode(&self) -> u8 {
        ((self.0 >> 16) & 0xF) as u8
    }
}

impl fmt::Debug for FirmwareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareStatus")
            .field("raw", &format_args!("{:08X}", self.0))
            .field("current_state", &self.current_state())
            .field("manufacturing_mode", &self.manufacturing_mode())
            .field("fpt_bad", &self.fpt_bad())
            .field("init_complete", &self.init_complete())
            .field("error_code", &self.error_code())
            .field("operation_mode", &self.operation_mode())
            .finish()
    }
}

/// Read HFSTS1 of a HECI function.
pub fn read_firmware_status<P: PciConfigSpace>(
    pci: &P,
    id: HeciDeviceId,
) -> Result<FirmwareStatus, HeciError> {
    let address = id.pci_address().ok_or(HeciError::DeviceNotPresent)?;
    if pci.read16(address, PCI_VENDOR_ID_OFFSET) != INTEL_VENDOR_ID {
        return Err(HeciError::DeviceNotPresent);
    }
    Ok(FirmwareStatus::from_raw(pci.read32(address, HECI_FWSTS1_OFFSET)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockHeci, MockPciConfig};

    fn heci1() -> PciAddress {
        HeciDeviceId::Heci1.pci_address().unwrap()
    }

    #[test]
    fn test_resolve_enables_function() {
        let pci = MockPciConfig::new();
        pci.add_heci_function(heci1(), BXT_HECI1_DEVICE_ID, 0x1_FED1_A004);

        let base = resolve_base_address(&pci, HeciDeviceId::Heci1).unwrap();
        assert_eq!(base, 0x1_FED1_A000);

        let command = pci.read16(heci1(), PCI_COMMAND_OFFSET);
        assert_eq!(
            command & (PCI_COMMAND_MEMORY_SPACE | PCI_COMMAND_BUS_MASTER),
            PCI_COMMAND_MEMORY_SPACE | PCI_COMMAND_BUS_MASTER
        );
        let pmcsr = pci.read16(heci1(), MockPciConfig::PM_CAP_OFFSET + PCI_PM_CSR_OFFSET);
        assert_eq!(pmcsr & PCI_PM_CSR_POWER_STATE_MASK, 0);
    }

    #[test]
    fn test_resolve_missing_function() {
        let pci = MockPciConfig::new();
        assert_eq!(
            resolve_base_address(&pci, HeciDeviceId::Heci2),
            Err(HeciError::DeviceNotPresent)
        );
    }

    #[test]
    fn test_resolve_unprogrammed_bar() {
        let pci = MockPciConfig::new();
        pci.add_heci_function(heci1(), BXT_HECI1_DEVICE_ID, 0);
        assert_eq!(
            resolve_base_address(&pci, HeciDeviceId::Heci1),
            Err(HeciError::DeviceNotPresent)
        );
    }

    #[test]
    fn test_ftpm_has_no_pci_function() {
        let pci = MockPciConfig::new();
        assert_eq!(HeciDeviceId::Ftpm.pci_address(), None);
        assert_eq!(
            resolve_base_address(&pci, HeciDeviceId::Ftpm),
            Err(HeciError::DeviceNotPresent)
        );
    }

    #[test]
    fn test_firmware_status() {
        let pci = MockPciConfig::new();
        pci.add_heci_function(heci1(), BXT_HECI1_DEVICE_ID, 0xFED1_A000);
        pci.set_fw_status(heci1(), 0x0000_0245);

        let status = read_firmware_status(&pci, HeciDeviceId::Heci1).unwrap();
        assert_eq!(status.current_state(), 5);
        assert!(!status.manufacturing_mode());
        assert!(!status.fpt_bad());
        assert_eq!(status.operation_state(), 1);
        assert!(status.init_complete());
        assert_eq!(status.error_code(), 0);
    }

    #[test]
    fn test_device_id_parse() {
        assert_eq!("HECI2".parse::<HeciDeviceId>(), Ok(HeciDeviceId::Heci2));
        assert_eq!("ftpm".parse::<HeciDeviceId>(), Ok(HeciDeviceId::Ftpm));
        assert!("heci9".parse::<HeciDeviceId>().is_err());
    }

    #[test]
    fn test_handle_defaults() {
        let handle = HeciDeviceHandle::new(HeciDeviceId::Heci1, 0xFED1_A000, MockHeci::new(8));
        assert_eq!(handle.max_message_len(), DEFAULT_MAX_MESSAGE_LEN);
        assert_eq!(handle.base_address(), 0xFED1_A000);
        assert_eq!(handle.registers().doorbell_count(), 0);
        assert_eq!(handle.with_max_message_len(64).max_message_len(), 64);
        assert!(FirmwareStatus::from_raw(1 << 5).fpt_bad());
    }
}
