//! HECI-Core: host side of the Intel HECI mailbox in Rust.
//!
//! This crate implements the Host Embedded Controller Interface used to talk
//! to the CSE/TXE on Broxton-class platforms: framing over the host and ME
//! circular buffers, doorbell signalling and MKHI request helpers.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Register offsets, CSR and header bit layouts
//! - **Transport**: Register access abstraction (MMIO, mock)
//! - **Ring**: Circular buffer pointer arithmetic and overflow detection
//! - **Device**: HECI instance identification and PCI resolution
//! - **HECI**: Send, receive and reset operations
//! - **MKHI**: Firmware version and capability queries
//! - **Events**: Observer pattern for tracing and test harnesses
//!
//! # Example
//!
//! ```no_run
//! use heci_core::{HeciConfig, HeciTransport, MkhiClient, MmioRegisters};
//!
//! let transport = HeciTransport::new(HeciConfig::default());
//! let base = 0xFED1_A000;
//! let registers = unsafe { MmioRegisters::from_physical(base) }.expect("null BAR");
//! let mut device = transport.open_device(registers, base);
//! transport.initialize(&mut device).expect("HECI not ready");
//!
//! let versions = MkhiClient::new(&transport, &mut device)
//!     .get_fw_version()
//!     .expect("MKHI failed");
//! println!("CSE firmware {}", versions.code);
//! ```

pub mod config;
pub mod device;
pub mod events;
pub mod heci;
pub mod message;
pub mod mkhi;
pub mod protocol;
pub mod ring;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::HeciConfig;
pub use device::{
    FirmwareStatus, HeciDeviceHandle, HeciDeviceId, read_firmware_status, resolve_base_address,
};
pub use events::{FrameDirection, HeciEvent, HeciObserver, NullObserver, TracingObserver};
pub use heci::{HeciAddress, HeciTransport};
pub use message::Message;
pub use mkhi::{FirmwareVersions, FwCapsSku, FwVersion, MkhiClient, MkhiError, MkhiStatus, PlatformType};
pub use protocol::{HeciCsr, HeciMessageHeader, MkhiHeader};
pub use ring::CircularBufferPointers;
pub use state::{Exchange, ExchangeState};
pub use transport::{
    HeciError, HeciRegisters, MmioRegisters, MockHeci, MockPciConfig, PciAddress, PciConfigSpace,
};
