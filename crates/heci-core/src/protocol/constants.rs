//! Protocol constants for the Broxton / Apollo Lake HECI interface.
//!
//! Register layout and MKHI identifiers follow the CSE/TXE host interface
//! used by the platform firmware.

// ============================================================================
// PCI Identification
// ============================================================================

/// Intel Corporation Vendor ID
pub const INTEL_VENDOR_ID: u16 = 0x8086;

/// PCI bus hosting the HECI functions.
pub const HECI_BUS: u8 = 0;
/// PCI device number hosting the HECI functions.
pub const HECI_DEVICE: u8 = 0x0F;

/// HECI1 function number.
pub const HECI1_FUNCTION: u8 = 0;
/// HECI2 function number.
pub const HECI2_FUNCTION: u8 = 1;
/// HECI3 function number.
pub const HECI3_FUNCTION: u8 = 2;

// Broxton-P / Apollo Lake TXE device IDs
pub const BXT_HECI1_DEVICE_ID: u16 = 0x5A9A;
pub const BXT_HECI2_DEVICE_ID: u16 = 0x5A9C;
pub const BXT_HECI3_DEVICE_ID: u16 = 0x5A9E;

/// All device IDs accepted during enumeration.
pub const SUPPORTED_DEVICE_IDS: &[u16] = &[
    BXT_HECI1_DEVICE_ID,
    BXT_HECI2_DEVICE_ID,
    BXT_HECI3_DEVICE_ID,
];

// ============================================================================
// PCI Config Space Offsets
// ============================================================================

pub const PCI_VENDOR_ID_OFFSET: u16 = 0x00;
pub const PCI_DEVICE_ID_OFFSET: u16 = 0x02;
pub const PCI_COMMAND_OFFSET: u16 = 0x04;
pub const PCI_STATUS_OFFSET: u16 = 0x06;
pub const PCI_BAR0_OFFSET: u16 = 0x10;
pub const PCI_BAR1_OFFSET: u16 = 0x14;
pub const PCI_CAPABILITY_PTR_OFFSET: u16 = 0x34;

/// Host Firmware Status register (HFSTS1 / FWSTS1).
pub const HECI_FWSTS1_OFFSET: u16 = 0x40;

pub const PCI_COMMAND_MEMORY_SPACE: u16 = 1 << 1;
pub const PCI_COMMAND_BUS_MASTER: u16 = 1 << 2;
pub const PCI_STATUS_CAPABILITY_LIST: u16 = 1 << 4;

/// Power Management capability ID.
pub const PCI_CAP_ID_PM: u8 = 0x01;
/// PMCSR offset from the start of the PM capability.
pub const PCI_PM_CSR_OFFSET: u16 = 0x04;
/// PMCSR power state field (D0..D3hot).
pub const PCI_PM_CSR_POWER_STATE_MASK: u16 = 0x0003;

/// BAR0 attribute bits (memory indicator, type, prefetchable).
pub const PCI_BAR_ATTR_MASK: u64 = 0x0F;
/// BAR0 type field value for a 64-bit memory BAR.
pub const PCI_BAR_TYPE_64BIT: u32 = 0x04;

// ============================================================================
// MMIO Register Offsets
// ============================================================================

/// Host Circular Buffer Write Window.
pub const H_CB_WW: u32 = 0x00;
/// Host Control Status register.
pub const H_CSR: u32 = 0x04;
/// ME Circular Buffer Read Window.
pub const ME_CB_RW: u32 = 0x08;
/// ME Control Status register (host read access).
pub const ME_CSR_HA: u32 = 0x0C;

// ============================================================================
// CSR Bits (identical layout for H_CSR and ME_CSR_HA)
// ============================================================================

/// Interrupt enable.
pub const CSR_IE: u32 = 1 << 0;
/// Interrupt status (write one to clear).
pub const CSR_IS: u32 = 1 << 1;
/// Interrupt generate (doorbell).
pub const CSR_IG: u32 = 1 << 2;
/// Ready.
pub const CSR_RDY: u32 = 1 << 3;
/// Reset.
pub const CSR_RST: u32 = 1 << 4;

pub const CSR_CBRP_SHIFT: u32 = 8;
pub const CSR_CBWP_SHIFT: u32 = 16;
pub const CSR_CBD_SHIFT: u32 = 24;

/// Value read back from an absent or disabled function.
pub const REGISTER_ABSENT: u32 = 0xFFFF_FFFF;

// ============================================================================
// Framing
// ============================================================================

/// Largest value of the 9-bit length field in the HECI message header.
pub const HECI_MAX_FRAME_LENGTH: usize = 0x1FF;

/// Default maximum message size accepted by the transport.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 0x1000;

/// Host address used by BIOS clients.
pub const BIOS_FIXED_HOST_ADDR: u8 = 0x00;
/// MKHI client address.
pub const HECI_MKHI_MESSAGE_ADDR: u8 = 0x07;

// ============================================================================
// Timing
// ============================================================================

pub const HECI_SEND_TIMEOUT_MS: u64 = 5_000;
pub const HECI_READ_TIMEOUT_MS: u64 = 5_000;
pub const HECI_INIT_TIMEOUT_MS: u64 = 2_000;
pub const HECI_POLL_INTERVAL_US: u64 = 1_000;

// ============================================================================
// MKHI Groups and Commands
// ============================================================================

pub const MKHI_FWCAPS_GROUP_ID: u8 = 0x03;
pub const MKHI_GEN_GROUP_ID: u8 = 0xFF;

/// GEN group: get firmware version.
pub const GEN_GET_FW_VERSION_CMD: u8 = 0x02;

/// FWCAPS group: get rule.
pub const FWCAPS_GET_RULE_CMD: u8 = 0x02;

/// Rule: firmware capability SKU.
pub const FW_CAPS_RULE_ID: u32 = 0x0000_0000;
/// Rule: platform type.
pub const PLATFORM_TYPE_RULE_ID: u32 = 0x0000_001D;
